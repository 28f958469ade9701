//! Capabilities the service expects from the video platform.
//!
//! The service never talks to the platform directly; it only sees the
//! [`Provider`] trait. The production implementation lives in [`ytdlp`] and
//! shells out to yt-dlp, with suggestions fetched over HTTP by [`suggest`].

pub mod suggest;
pub mod ytdlp;

use std::{future::Future, io, process::ExitStatus};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::{Child, ChildStderr},
    task::JoinHandle,
};

const CHUNK_SIZE: usize = 64 * 1024;
/// Stderr kept for error messages; anything past it is read and discarded.
const STDERR_KEEP_BYTES: u64 = 16 * 1024;

/// Which elementary stream to request. Quality is always the highest offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFilter {
    AudioOnly,
    VideoOnly,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The platform does not know the id, or refuses to serve it.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One entry of a search result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub video_id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

/// Canonical metadata for a single video. Everything beyond `id` and `title`
/// is provider-native and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why copying a [`ByteStream`] into a sink stopped early.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Reading from the provider failed or the producing process exited
    /// unsuccessfully.
    #[error("{0}")]
    Source(String),

    /// The destination refused the bytes.
    #[error("{0}")]
    Sink(#[source] io::Error),
}

/// A byte stream handed out by a provider.
///
/// When the bytes come from a child process, the process is kept alongside
/// the reader: its exit status is checked once the reader hits EOF, and it is
/// killed if the stream is dropped half-way.
pub struct ByteStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    process: Option<StreamProcess>,
}

struct StreamProcess {
    child: Child,
    label: String,
    stderr: Option<JoinHandle<String>>,
}

impl ByteStream {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            process: None,
        }
    }

    /// Wraps a spawned child whose stdout carries the payload. The child must
    /// have been spawned with a piped stdout and `kill_on_drop(true)`.
    pub fn from_process(mut child: Child, label: impl Into<String>) -> Result<Self, ProviderError> {
        let label = label.into();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Failed(format!("{label}: stdout was not captured")))?;
        let stderr = child.stderr.take().map(collect_stderr);
        Ok(Self {
            reader: Box::new(stdout),
            process: Some(StreamProcess {
                child,
                label,
                stderr,
            }),
        })
    }

    /// Copies every byte into `sink`, flushes it, and returns the byte count.
    pub async fn pipe_into<W>(mut self, sink: &mut W) -> Result<u64, PipeError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let read = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|err| PipeError::Source(format!("reading provider stream: {err}")))?;
            if read == 0 {
                break;
            }
            sink.write_all(&buf[..read]).await.map_err(PipeError::Sink)?;
            total += read as u64;
        }
        sink.flush().await.map_err(PipeError::Sink)?;

        if let Some(process) = self.process.take() {
            process.finish().await?;
        }
        Ok(total)
    }
}

impl StreamProcess {
    async fn finish(mut self) -> Result<(), PipeError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| PipeError::Source(format!("{}: waiting for exit: {err}", self.label)))?;
        if status.success() {
            return Ok(());
        }

        let stderr = match self.stderr.take() {
            Some(collector) => collector.await.unwrap_or_default(),
            None => String::new(),
        };
        Err(PipeError::Source(describe_exit(&self.label, status, &stderr)))
    }
}

/// Drains a child's stderr on its own task so a chatty process never blocks
/// on a full pipe while its stdout is being read.
fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut kept = Vec::new();
        let _ = (&mut stderr)
            .take(STDERR_KEEP_BYTES)
            .read_to_end(&mut kept)
            .await;
        let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
        String::from_utf8_lossy(&kept).into_owned()
    })
}

pub(crate) fn describe_exit(label: &str, status: ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{label} exited with {status}")
    } else {
        format!("{label} exited with {status}: {stderr}")
    }
}

/// Everything the service needs from the video platform.
///
/// Methods return `Send` futures so handlers stay spawnable on the
/// multi-threaded runtime.
pub trait Provider: Send + Sync + 'static {
    fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<VideoSummary>, ProviderError>> + Send;

    fn suggest(&self, query: &str)
    -> impl Future<Output = Result<Vec<String>, ProviderError>> + Send;

    fn basic_info(
        &self,
        video_id: &str,
    ) -> impl Future<Output = Result<VideoMetadata, ProviderError>> + Send;

    fn open_stream(
        &self,
        video_id: &str,
        filter: StreamFilter,
    ) -> impl Future<Output = Result<ByteStream, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn pipe_into_copies_all_bytes() {
        let payload = vec![7u8; CHUNK_SIZE * 2 + 17];
        let stream = ByteStream::from_reader(Cursor::new(payload.clone()));
        let mut sink = Vec::new();
        let written = stream.pipe_into(&mut sink).await.unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[tokio::test]
    async fn failing_process_surfaces_as_source_error() {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("printf partial; echo 'boom' >&2; exit 3")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stream = ByteStream::from_process(child, "sh").unwrap();
        let mut sink = Vec::new();
        let err = stream.pipe_into(&mut sink).await.unwrap_err();
        match err {
            PipeError::Source(message) => {
                assert!(message.contains("sh exited"), "{message}");
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sink, b"partial");
    }

    #[tokio::test]
    async fn chatty_stderr_does_not_stall_the_stream() {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("head -c 300000 /dev/zero | tr '\\0' x >&2; printf payload; exit 2")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stream = ByteStream::from_process(child, "sh").unwrap();
        let mut sink = Vec::new();
        let copied = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            stream.pipe_into(&mut sink),
        )
        .await
        .expect("stream stalled on a full stderr pipe");

        match copied {
            Err(PipeError::Source(message)) => {
                assert!(message.contains("sh exited"), "{message}");
                assert!(message.len() < STDERR_KEEP_BYTES as usize + 200);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(sink, b"payload");
    }

    #[test]
    fn summary_serializes_like_search_results() {
        let summary = VideoSummary {
            kind: "video".into(),
            video_id: "abc".into(),
            url: "https://youtube.com/watch?v=abc".into(),
            title: "Example".into(),
            description: String::new(),
            image: None,
            thumbnail: None,
            seconds: Some(65),
            timestamp: Some("1:05".into()),
            views: None,
            author: Some(Author {
                name: "Channel".into(),
                url: None,
            }),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["videoId"], "abc");
        assert_eq!(json["timestamp"], "1:05");
        assert!(json.get("views").is_none());
        assert_eq!(json["author"]["name"], "Channel");
    }
}
