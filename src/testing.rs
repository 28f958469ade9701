//! Shared fixtures for unit tests: shell-script stubs and a scripted provider.

use std::{
    collections::HashMap,
    fs,
    io::{self, Cursor},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    pin::Pin,
    sync::atomic::{AtomicUsize, Ordering},
    task::{Context, Poll},
    time::Duration,
};

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Map;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::provider::{
    ByteStream, Provider, ProviderError, StreamFilter, VideoMetadata, VideoSummary,
};

/// Writes an executable `/bin/sh` script named `name` into `dir`.
pub(crate) fn install_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}"))?;
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;
    Ok(path)
}

/// Provider double that serves canned data and counts every call.
#[derive(Default)]
pub(crate) struct FakeProvider {
    pub titles: HashMap<String, String>,
    pub suggestions: Vec<String>,
    pub videos: Vec<VideoSummary>,
    pub audio: Vec<u8>,
    pub video: Vec<u8>,
    pub fail_streams: bool,
    /// Video stream errors out after its bytes instead of ending cleanly.
    pub broken_video: bool,
    /// Lookups sleep this long before answering.
    pub delay: Option<Duration>,
    pub search_calls: AtomicUsize,
    pub suggest_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
    pub stream_requests: Mutex<Vec<StreamFilter>>,
}

impl FakeProvider {
    pub fn with_video(id: &str, title: &str) -> Self {
        let mut provider = Self {
            audio: b"AUDIO-TRACK".to_vec(),
            video: b"VIDEO-TRACK".to_vec(),
            ..Self::default()
        };
        provider.titles.insert(id.to_owned(), title.to_owned());
        provider
    }

    pub fn suggest_calls(&self) -> usize {
        self.suggest_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn requested_streams(&self) -> Vec<StreamFilter> {
        self.stream_requests.lock().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Provider for FakeProvider {
    async fn search(
        &self,
        _query: &str,
        _limit: Option<usize>,
    ) -> Result<Vec<VideoSummary>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.videos.clone())
    }

    async fn suggest(&self, _query: &str) -> Result<Vec<String>, ProviderError> {
        self.suggest_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.suggestions.clone())
    }

    async fn basic_info(&self, video_id: &str) -> Result<VideoMetadata, ProviderError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let title = self
            .titles
            .get(video_id)
            .ok_or_else(|| ProviderError::Unavailable(format!("Video unavailable: {video_id}")))?;
        Ok(VideoMetadata {
            id: video_id.to_owned(),
            title: title.clone(),
            extra: Map::new(),
        })
    }

    async fn open_stream(
        &self,
        _video_id: &str,
        filter: StreamFilter,
    ) -> Result<ByteStream, ProviderError> {
        self.stream_requests.lock().push(filter);
        if self.fail_streams {
            return Err(ProviderError::Failed("stream refused".into()));
        }
        let stream = match filter {
            StreamFilter::AudioOnly => ByteStream::from_reader(Cursor::new(self.audio.clone())),
            StreamFilter::VideoOnly if self.broken_video => {
                ByteStream::from_reader(Cursor::new(self.video.clone()).chain(BrokenReader))
            }
            StreamFilter::VideoOnly => ByteStream::from_reader(Cursor::new(self.video.clone())),
        };
        Ok(stream)
    }
}

/// Reader that fails on first use, like a connection reset mid-transfer.
pub(crate) struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by provider",
        )))
    }
}

/// Lists the entries left in `dir`, for asserting that scratch files are gone.
pub(crate) fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}
