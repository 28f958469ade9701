//! Download lifecycle: run the pipeline, stream the artifact, delete it.
//!
//! The artifact travels inside the response body. Its file is removed as
//! soon as the last chunk is read, or when the body is dropped early because
//! the client went away. Failures before the body exists drop the artifact
//! on the spot, which removes the file as well.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::{
    error::{ApiResult, ServiceError},
    filename::content_disposition,
    pipeline::MediaArtifact,
    provider::Provider,
    service::AppService,
    validation::DownloadRequest,
};

pub const CACHE_CONTROL_VALUE: &str = "max-age=36000";

pub async fn handle<P: Provider>(
    service: &AppService<P>,
    request: &DownloadRequest,
) -> ApiResult<Response> {
    let artifact = service.download(request).await?;
    tracing::info!(
        video_id = %request.video_id,
        file_name = artifact.file_name(),
        size = artifact.size(),
        "Downloaded"
    );
    respond(artifact, !request.suppress_disposition).await
}

/// Builds the streaming response for a finished artifact. With `attachment`
/// unset the body is served inline, without `Content-Disposition`.
pub async fn respond(artifact: MediaArtifact, attachment: bool) -> ApiResult<Response> {
    let file = File::open(artifact.path()).await.map_err(|err| {
        ServiceError::internal(format!("opening {}: {err}", artifact.path().display()))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(artifact.mime_type()));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(artifact.size()));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));
    if attachment {
        let disposition = content_disposition(artifact.file_name());
        let value = HeaderValue::from_str(&disposition).map_err(|err| {
            ServiceError::internal(format!("invalid disposition {disposition:?}: {err}"))
        })?;
        headers.insert(CONTENT_DISPOSITION, value);
    }

    let body = Body::from_stream(ArtifactBody {
        stream: ReaderStream::new(file),
        artifact: Some(artifact),
        sent: 0,
    });
    Ok((headers, body).into_response())
}

/// Response body that owns the artifact it reads from.
struct ArtifactBody {
    stream: ReaderStream<File>,
    artifact: Option<MediaArtifact>,
    sent: u64,
}

impl ArtifactBody {
    fn release(&mut self) {
        if let Some(artifact) = self.artifact.take() {
            tracing::debug!(
                file_name = artifact.file_name(),
                sent = self.sent,
                "releasing artifact"
            );
        }
    }
}

impl Stream for ArtifactBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(artifact) = &this.artifact {
                    tracing::error!(
                        file_name = artifact.file_name(),
                        sent = this.sent,
                        %err,
                        "failed while streaming artifact"
                    );
                }
                this.release();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ArtifactBody {
    fn drop(&mut self) {
        if let Some(artifact) = &self.artifact {
            tracing::debug!(
                file_name = artifact.file_name(),
                sent = self.sent,
                expected = artifact.size(),
                "response dropped before the artifact was fully sent"
            );
        }
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ResultCache,
        pipeline::{MediaKind, MediaPipeline, PipelineConfig},
        testing::{FakeProvider, dir_entries},
    };
    use anyhow::Result;
    use axum::http::StatusCode;
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn service(work_dir: &Path) -> AppService<FakeProvider> {
        AppService::new(
            FakeProvider::with_video("abc", "Example Video"),
            ResultCache::default(),
            MediaPipeline::new(PipelineConfig {
                ffmpeg: PathBuf::from("ffmpeg"),
                work_dir: work_dir.to_path_buf(),
            }),
        )
    }

    fn audio_request(suppress_disposition: bool) -> DownloadRequest {
        DownloadRequest {
            video_id: "abc".into(),
            kind: MediaKind::Audio,
            suppress_disposition,
        }
    }

    #[tokio::test]
    async fn streams_artifact_and_removes_it_afterwards() -> Result<()> {
        let work = tempdir()?;
        let service = service(work.path());

        let response = handle(&service, &audio_request(false)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "audio/mpeg");
        assert_eq!(headers[CONTENT_LENGTH], "11");
        assert_eq!(headers[CACHE_CONTROL], "max-age=36000");
        assert_eq!(
            headers[CONTENT_DISPOSITION],
            "attachment; filename=\"Example Video.mp3\""
        );
        assert_eq!(dir_entries(work.path()).len(), 1);

        let body = response.into_body().collect().await?.to_bytes();
        assert_eq!(&body[..], b"AUDIO-TRACK");
        assert!(dir_entries(work.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn prevent_download_omits_disposition() -> Result<()> {
        let work = tempdir()?;
        let service = service(work.path());

        let response = handle(&service, &audio_request(true)).await.unwrap();
        assert!(response.headers().get(CONTENT_DISPOSITION).is_none());
        assert_eq!(response.headers()[CONTENT_TYPE], "audio/mpeg");
        let body = response.into_body().collect().await?.to_bytes();
        assert_eq!(&body[..], b"AUDIO-TRACK");
        assert!(dir_entries(work.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_response_still_removes_file() -> Result<()> {
        let work = tempdir()?;
        let service = service(work.path());

        let response = handle(&service, &audio_request(false)).await.unwrap();
        let mut stream = response.into_body().into_data_stream();
        assert!(stream.next().await.is_some());
        drop(stream);
        assert!(dir_entries(work.path()).is_empty());

        let response = handle(&service, &audio_request(false)).await.unwrap();
        drop(response);
        assert!(dir_entries(work.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_artifact_file_is_internal_error() -> Result<()> {
        let work = tempdir()?;
        let service = service(work.path());
        let artifact = service.download(&audio_request(false)).await?;
        std::fs::remove_file(artifact.path())?;

        let Err(err) = respond(artifact, true).await else {
            panic!("expected a missing artifact to fail");
        };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(dir_entries(work.path()).is_empty());
        Ok(())
    }
}
