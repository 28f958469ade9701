//! Media stream pipeline: provider byte streams in, one scratch file out.
//!
//! Audio downloads copy a single audio-only stream straight into a scratch
//! file. Video downloads open a video-only and an audio-only stream at the
//! same time and feed them into ffmpeg through two named FIFOs, one per
//! track; ffmpeg copies both codecs into a single mp4.
//!
//! Everything created here is owned by a value that cleans up on drop:
//! [`ScratchFile`] removes the output file, [`MuxChannels`] removes the FIFO
//! directory, and both the provider processes and ffmpeg are spawned with
//! `kill_on_drop(true)`. Cancelling the future therefore tears the whole job
//! down.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use nix::{errno::Errno, sys::stat::Mode, unistd::mkfifo};
use tempfile::{Builder, TempDir, TempPath};
use tokio::{fs::File, net::unix::pipe, process::Command, time::sleep};

use crate::{
    error::ServiceError,
    filename::{logical_file_name, scratch_suffix},
    metadata::normalize,
    provider::{ByteStream, PipeError, Provider, StreamFilter, VideoMetadata, describe_exit},
};

pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";
const SCRATCH_RANDOM_CHARS: usize = 16;
const CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(20);
const THREAD_QUEUE_SIZE: &str = "4096";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Video => "video/mp4",
        }
    }
}

/// A file in the work directory that is deleted exactly once: on drop, or
/// through [`ScratchFile::remove`]. Deletion failures are logged, never
/// propagated.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    guard: Option<TempPath>,
}

impl ScratchFile {
    /// Creates an empty file named `<random><suffix>` inside `dir`. The name
    /// is reserved with `O_EXCL`, so concurrent downloads of the same title
    /// never share a file.
    pub fn reserve(dir: &Path, title: &str, kind: MediaKind) -> io::Result<(std::fs::File, Self)> {
        let suffix = scratch_suffix(title, kind.extension());
        let named = Builder::new()
            .prefix("")
            .suffix(&suffix)
            .rand_bytes(SCRATCH_RANDOM_CHARS)
            .tempfile_in(dir)?;
        let (file, guard) = named.into_parts();
        let path = guard.to_path_buf();
        Ok((
            file,
            Self {
                path,
                guard: Some(guard),
            },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        match guard.close() {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed scratch file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                %err,
                "failed to remove scratch file"
            ),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// The finished output of a download, ready to be streamed to a client.
/// Dropping it deletes the file.
#[derive(Debug)]
pub struct MediaArtifact {
    file: ScratchFile,
    file_name: String,
    size: u64,
    kind: MediaKind,
}

impl MediaArtifact {
    async fn finish(file: ScratchFile, title: &str, kind: MediaKind) -> Result<Self, ServiceError> {
        let size = tokio::fs::metadata(file.path())
            .await
            .map_err(|err| {
                ServiceError::internal(format!("stat {}: {err}", file.path().display()))
            })?
            .len();
        Ok(Self {
            file,
            file_name: logical_file_name(title, kind.extension()),
            size,
            kind,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Sanitized name shown to the client, e.g. `Example Video.mp3`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ffmpeg: PathBuf,
    pub work_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG_PROGRAM),
            work_dir: std::env::temp_dir(),
        }
    }
}

pub struct MediaPipeline {
    config: PipelineConfig,
}

impl MediaPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn produce<P: Provider>(
        &self,
        provider: &P,
        metadata: &VideoMetadata,
        kind: MediaKind,
    ) -> Result<MediaArtifact, ServiceError> {
        match kind {
            MediaKind::Audio => self.audio_only(provider, metadata).await,
            MediaKind::Video => self.audio_video(provider, metadata).await,
        }
    }

    async fn audio_only<P: Provider>(
        &self,
        provider: &P,
        metadata: &VideoMetadata,
    ) -> Result<MediaArtifact, ServiceError> {
        let stream = provider
            .open_stream(&metadata.id, StreamFilter::AudioOnly)
            .await
            .map_err(|err| normalize(&metadata.id, err))?;

        let (file, scratch) = self.reserve(&metadata.title, MediaKind::Audio)?;
        let mut file = File::from_std(file);
        stream.pipe_into(&mut file).await.map_err(|err| match err {
            PipeError::Source(message) => ServiceError::Upstream(message),
            PipeError::Sink(err) => {
                ServiceError::internal(format!("writing {}: {err}", scratch.path().display()))
            }
        })?;
        drop(file);

        MediaArtifact::finish(scratch, &metadata.title, MediaKind::Audio).await
    }

    async fn audio_video<P: Provider>(
        &self,
        provider: &P,
        metadata: &VideoMetadata,
    ) -> Result<MediaArtifact, ServiceError> {
        let (video, audio) = tokio::try_join!(
            provider.open_stream(&metadata.id, StreamFilter::VideoOnly),
            provider.open_stream(&metadata.id, StreamFilter::AudioOnly),
        )
        .map_err(|err| normalize(&metadata.id, err))?;

        let (file, scratch) = self.reserve(&metadata.title, MediaKind::Video)?;
        drop(file);
        let channels = MuxChannels::create(&self.config.work_dir).map_err(|err| {
            ServiceError::internal(format!("creating mux channels: {err}"))
        })?;

        let job = MuxJob {
            program: &self.config.ffmpeg,
            channels: &channels,
            output: scratch.path(),
        };
        job.run(video, audio).await?;
        drop(channels);

        MediaArtifact::finish(scratch, &metadata.title, MediaKind::Video).await
    }

    fn reserve(
        &self,
        title: &str,
        kind: MediaKind,
    ) -> Result<(std::fs::File, ScratchFile), ServiceError> {
        ScratchFile::reserve(&self.config.work_dir, title, kind).map_err(|err| {
            ServiceError::internal(format!(
                "creating scratch file in {}: {err}",
                self.config.work_dir.display()
            ))
        })
    }
}

/// The two inputs of a mux job, each a FIFO with its own name. The directory
/// holding them is removed on drop.
pub struct MuxChannels {
    video: PathBuf,
    audio: PathBuf,
    _dir: TempDir,
}

impl MuxChannels {
    pub fn create(work_dir: &Path) -> io::Result<Self> {
        let dir = Builder::new().prefix("mux-").tempdir_in(work_dir)?;
        let video = dir.path().join("video.pipe");
        let audio = dir.path().join("audio.pipe");
        for channel in [&video, &audio] {
            mkfifo(channel.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)?;
        }
        Ok(Self {
            video,
            audio,
            _dir: dir,
        })
    }

    pub fn video(&self) -> &Path {
        &self.video
    }

    pub fn audio(&self) -> &Path {
        &self.audio
    }
}

struct MuxJob<'a> {
    program: &'a Path,
    channels: &'a MuxChannels,
    output: &'a Path,
}

impl MuxJob<'_> {
    fn command(&self) -> Command {
        let mut command = Command::new(self.program);
        command
            .args(mux_arguments(self.channels, self.output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Runs ffmpeg while both tracks are fed in concurrently. ffmpeg's exit
    /// status decides the outcome; a provider stream that breaks first aborts
    /// the job as an upstream failure.
    async fn run(&self, video: ByteStream, audio: ByteStream) -> Result<(), ServiceError> {
        let child = self.command().spawn().map_err(|err| {
            ServiceError::Mux(format!("spawning {}: {err}", self.program.display()))
        })?;
        tracing::debug!(output = %self.output.display(), "started mux job");

        let exited = child.wait_with_output();
        let feed = async {
            tokio::try_join!(
                feed_channel(video, &self.channels.video),
                feed_channel(audio, &self.channels.audio),
            )
        };
        tokio::pin!(exited, feed);

        let output = tokio::select! {
            biased;
            fed = &mut feed => match fed {
                Ok(_) => exited.await,
                Err(PipeError::Source(message)) => return Err(ServiceError::Upstream(message)),
                Err(PipeError::Sink(err)) => {
                    tracing::debug!(%err, "mux channel closed early");
                    exited.await
                }
            },
            output = &mut exited => output,
        };

        let output = output
            .map_err(|err| ServiceError::Mux(format!("waiting for ffmpeg: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::Mux(describe_exit("ffmpeg", output.status, &stderr)));
        }
        Ok(())
    }
}

/// ffmpeg arguments: video from the first channel, audio from the second,
/// both codecs copied, written as mp4.
fn mux_arguments(channels: &MuxChannels, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-loglevel", "error", "-hide_banner", "-nostdin", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect();
    for input in [channels.video(), channels.audio()] {
        args.push("-thread_queue_size".into());
        args.push(THREAD_QUEUE_SIZE.into());
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
    }
    args.extend(
        [
            "-c:v", "copy", "-c:a", "copy", "-map", "0:v:0", "-map", "1:a:0", "-f", "mp4",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

async fn feed_channel(stream: ByteStream, channel: &Path) -> Result<u64, PipeError> {
    let mut sender = open_channel(channel).await.map_err(PipeError::Sink)?;
    stream.pipe_into(&mut sender).await
}

/// Opens the write end of a FIFO once ffmpeg has opened the read end.
/// Until then the non-blocking open fails with `ENXIO` and is retried.
async fn open_channel(channel: &Path) -> io::Result<pipe::Sender> {
    loop {
        match pipe::OpenOptions::new().open_sender(channel) {
            Ok(sender) => return Ok(sender),
            Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                sleep(CHANNEL_POLL_INTERVAL).await;
            }
            Err(err) => return Err(err),
        }
    }
}
