//! [`Provider`] backed by the yt-dlp command line tool.
//!
//! Every call spawns yt-dlp with `kill_on_drop(true)`, so a request that is
//! cancelled half-way never leaves a downloader running in the background.
//! Video ids always follow a `--` separator so an id starting with a dash is
//! never read as a flag.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;

use super::{
    Author, ByteStream, Provider, ProviderError, StreamFilter, VideoMetadata, VideoSummary,
    describe_exit, suggest::SuggestClient,
};

pub const DEFAULT_YTDLP_PROGRAM: &str = "yt-dlp";
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const DEFAULT_SEARCH_RESULTS: usize = 20;
/// Upper bound on entries requested from one search; larger limits are
/// served from this page.
const MAX_SEARCH_RESULTS: usize = 50;

/// Error output fragments that mean "this id does not resolve to a playable
/// video" rather than a transient failure.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "This video is unavailable",
    "Private video",
    "Incomplete YouTube ID",
    "is not a valid URL",
    "HTTP Error 404",
    "This video has been removed",
];

/// Keys dropped from the metadata dump before it is passed through; they are
/// large and only meaningful to yt-dlp itself.
const BULKY_INFO_KEYS: &[&str] = &[
    "formats",
    "requested_formats",
    "automatic_captions",
    "subtitles",
    "heatmap",
    "thumbnails",
    "_version",
];

pub struct YtDlpProvider {
    program: PathBuf,
    suggestions: SuggestClient,
}

/// Subset of a flat-playlist search entry.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel_url: Option<String>,
    #[serde(default)]
    uploader_url: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPlaylist {
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

impl YtDlpProvider {
    pub fn new(program: impl Into<PathBuf>, suggestions: SuggestClient) -> Self {
        Self {
            program: program.into(),
            suggestions,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    async fn run_json(&self, mut command: Command, target: &str) -> Result<Value, ProviderError> {
        let output = command.output().await.map_err(|err| {
            ProviderError::Failed(format!("running {}: {err}", self.program.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(target, output.status, &stderr));
        }

        serde_json::from_slice(&output.stdout).map_err(|err| {
            ProviderError::Failed(format!("parsing yt-dlp output for {target}: {err}"))
        })
    }
}

impl Provider for YtDlpProvider {
    async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<VideoSummary>, ProviderError> {
        let count = search_count(limit);
        let mut command = self.command();
        command
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--")
            .arg(format!("ytsearch{count}:{query}"));

        let value = self.run_json(command, query).await?;
        let playlist: SearchPlaylist = serde_json::from_value(value)
            .map_err(|err| ProviderError::Failed(format!("unexpected search payload: {err}")))?;
        Ok(playlist.entries.into_iter().map(summary_from_entry).collect())
    }

    async fn suggest(&self, query: &str) -> Result<Vec<String>, ProviderError> {
        self.suggestions.fetch(query).await
    }

    async fn basic_info(&self, video_id: &str) -> Result<VideoMetadata, ProviderError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--")
            .arg(watch_url(video_id));

        let value = self.run_json(command, video_id).await?;
        metadata_from_info(video_id, value)
    }

    async fn open_stream(
        &self,
        video_id: &str,
        filter: StreamFilter,
    ) -> Result<ByteStream, ProviderError> {
        let mut command = self.command();
        command
            .arg("--quiet")
            .arg("--format")
            .arg(format_selector(filter))
            .arg("--output")
            .arg("-")
            .arg("--")
            .arg(watch_url(video_id))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|err| {
            ProviderError::Failed(format!("spawning {}: {err}", self.program.display()))
        })?;
        tracing::debug!(video_id, ?filter, "opened provider stream");
        ByteStream::from_process(child, format!("yt-dlp ({video_id})"))
    }
}

fn search_count(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS)
}

fn watch_url(video_id: &str) -> String {
    format!("{WATCH_URL}{video_id}")
}

fn format_selector(filter: StreamFilter) -> &'static str {
    match filter {
        StreamFilter::AudioOnly => "bestaudio",
        StreamFilter::VideoOnly => "bestvideo",
    }
}

fn classify_failure(target: &str, status: std::process::ExitStatus, stderr: &str) -> ProviderError {
    if UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
    {
        let reason = stderr
            .lines()
            .find(|line| line.contains("ERROR"))
            .map(|line| line.trim().to_owned())
            .unwrap_or_else(|| format!("No video id found: {target}"));
        return ProviderError::Unavailable(reason);
    }
    ProviderError::Failed(describe_exit("yt-dlp", status, stderr))
}

fn metadata_from_info(video_id: &str, value: Value) -> Result<VideoMetadata, ProviderError> {
    let Value::Object(mut fields) = value else {
        return Err(ProviderError::Failed(format!(
            "metadata for {video_id} is not an object"
        )));
    };

    for key in BULKY_INFO_KEYS {
        fields.remove(*key);
    }

    let id = match fields.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => video_id.to_owned(),
    };
    let full_title = take_string(&mut fields, "fulltitle");
    let short_title = take_string(&mut fields, "title");
    let title = full_title
        .or(short_title)
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| id.clone());

    Ok(VideoMetadata {
        id,
        title,
        extra: fields,
    })
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(value)) => Some(value),
        _ => None,
    }
}

fn summary_from_entry(entry: SearchEntry) -> VideoSummary {
    let seconds = entry
        .duration
        .filter(|duration| duration.is_finite() && *duration >= 0.0)
        .map(|duration| duration.round() as u64);
    let thumbnail = entry
        .thumbnails
        .into_iter()
        .rev()
        .find_map(|thumb| thumb.url)
        .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", entry.id));
    let author = entry.channel.or(entry.uploader).map(|name| Author {
        name,
        url: entry.channel_url.or(entry.uploader_url),
    });

    VideoSummary {
        kind: "video".to_owned(),
        url: format!("https://youtube.com/watch?v={}", entry.id),
        title: entry.title.unwrap_or_default(),
        description: entry.description.unwrap_or_default(),
        image: Some(thumbnail.clone()),
        thumbnail: Some(thumbnail),
        seconds,
        timestamp: seconds.map(format_duration),
        views: entry.view_count,
        author,
        video_id: entry.id,
    }
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
pub fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
