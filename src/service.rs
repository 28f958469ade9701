//! The service object shared by every request handler.
//!
//! Built once at startup and handed to the router behind an `Arc`. It owns
//! the provider, the result cache, and the media pipeline; nothing about it
//! is global.

use serde::{Deserialize, Serialize};

use crate::{
    cache::ResultCache,
    error::ServiceError,
    metadata::MetadataResolver,
    pipeline::{MediaArtifact, MediaPipeline},
    provider::{Provider, ProviderError, VideoSummary},
    validation::{DownloadRequest, LookupRequest},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideosResponse {
    pub videos: Vec<VideoSummary>,
}

pub struct AppService<P> {
    provider: P,
    cache: ResultCache,
    pipeline: MediaPipeline,
}

impl<P: Provider> AppService<P> {
    pub fn new(provider: P, cache: ResultCache, pipeline: MediaPipeline) -> Self {
        Self {
            provider,
            cache,
            pipeline,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn suggestions(
        &self,
        request: &LookupRequest,
    ) -> Result<SuggestionsResponse, ServiceError> {
        let key = ResultCache::key("suggestions", request);
        let provider = &self.provider;
        let suggestions = self
            .cache
            .get_or_fetch(key, move || async move {
                let mut suggestions = provider
                    .suggest(&request.query)
                    .await
                    .map_err(lookup_failure)?;
                if let Some(limit) = request.limit {
                    suggestions.truncate(limit);
                }
                Ok::<_, ServiceError>(suggestions)
            })
            .await?;
        Ok(SuggestionsResponse { suggestions })
    }

    pub async fn videos(&self, request: &LookupRequest) -> Result<VideosResponse, ServiceError> {
        let key = ResultCache::key("videos", request);
        let provider = &self.provider;
        let videos = self
            .cache
            .get_or_fetch(key, move || async move {
                let mut videos = provider
                    .search(&request.query, request.limit)
                    .await
                    .map_err(lookup_failure)?;
                if let Some(limit) = request.limit {
                    videos.truncate(limit);
                }
                Ok::<_, ServiceError>(videos)
            })
            .await?;
        Ok(VideosResponse { videos })
    }

    /// Resolves fresh metadata for the title, then runs the pipeline for the
    /// requested kind. The returned artifact deletes its file when dropped.
    pub async fn download(&self, request: &DownloadRequest) -> Result<MediaArtifact, ServiceError> {
        let metadata = MetadataResolver::new(&self.provider)
            .resolve(&request.video_id)
            .await?;
        self.pipeline
            .produce(&self.provider, &metadata, request.kind)
            .await
    }
}

fn lookup_failure(err: ProviderError) -> ServiceError {
    ServiceError::Upstream(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{MediaKind, PipelineConfig},
        provider::Author,
        testing::FakeProvider,
    };
    use std::path::PathBuf;

    fn service(provider: FakeProvider) -> AppService<FakeProvider> {
        AppService::new(
            provider,
            ResultCache::default(),
            MediaPipeline::new(PipelineConfig {
                ffmpeg: PathBuf::from("ffmpeg"),
                work_dir: std::env::temp_dir(),
            }),
        )
    }

    fn summary(id: &str) -> VideoSummary {
        VideoSummary {
            kind: "video".into(),
            video_id: id.into(),
            url: format!("https://youtube.com/watch?v={id}"),
            title: format!("Video {id}"),
            description: String::new(),
            image: None,
            thumbnail: None,
            seconds: Some(10),
            timestamp: Some("0:10".into()),
            views: Some(3),
            author: Some(Author {
                name: "Someone".into(),
                url: None,
            }),
        }
    }

    fn lookup(query: &str, limit: Option<usize>) -> LookupRequest {
        LookupRequest {
            query: query.into(),
            limit,
        }
    }

    #[tokio::test]
    async fn suggestions_are_cached_within_ttl() {
        let provider = FakeProvider {
            suggestions: (1..=8).map(|n| format!("cat {n}")).collect(),
            ..FakeProvider::default()
        };
        let service = service(provider);

        let first = service.suggestions(&lookup("cat", Some(5))).await.unwrap();
        let second = service.suggestions(&lookup("cat", Some(5))).await.unwrap();
        assert_eq!(first.suggestions.len(), 5);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(service.provider().suggest_calls(), 1);

        // A different limit is a different cache key.
        service.suggestions(&lookup("cat", Some(2))).await.unwrap();
        assert_eq!(service.provider().suggest_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_refetch() {
        let provider = FakeProvider {
            suggestions: vec!["cat".into()],
            ..FakeProvider::default()
        };
        let service = service(provider);
        service.suggestions(&lookup("cat", None)).await.unwrap();
        tokio::time::advance(crate::cache::DEFAULT_TTL).await;
        service.suggestions(&lookup("cat", None)).await.unwrap();
        assert_eq!(service.provider().suggest_calls(), 2);
    }

    #[tokio::test]
    async fn videos_truncate_and_cache() {
        let provider = FakeProvider {
            videos: vec![summary("a"), summary("b"), summary("c")],
            ..FakeProvider::default()
        };
        let service = service(provider);

        let response = service.videos(&lookup("cats", Some(2))).await.unwrap();
        assert_eq!(
            response
                .videos
                .iter()
                .map(|video| video.video_id.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        let again = service.videos(&lookup("cats", Some(2))).await.unwrap();
        assert_eq!(response, again);
        assert_eq!(service.provider().search_calls(), 1);

        let all = service.videos(&lookup("cats", None)).await.unwrap();
        assert_eq!(all.videos.len(), 3);
    }

    #[tokio::test]
    async fn download_of_unknown_video_is_not_found() {
        let service = service(FakeProvider::default());
        let request = DownloadRequest {
            video_id: "missing".into(),
            kind: MediaKind::Audio,
            suppress_disposition: false,
        };
        let err = service.download(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)), "{err:?}");
        assert!(service.provider().requested_streams().is_empty());
    }

    #[tokio::test]
    async fn concurrent_identical_lookups_reach_provider_once() {
        let provider = FakeProvider {
            suggestions: vec!["cat videos".into()],
            videos: vec![summary("a")],
            delay: Some(std::time::Duration::from_millis(50)),
            ..FakeProvider::default()
        };
        let service = service(provider);
        let request = lookup("cat", Some(5));

        let (first, second) = tokio::join!(
            service.suggestions(&request),
            service.suggestions(&request)
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(service.provider().suggest_calls(), 1);

        let (first, second) = tokio::join!(service.videos(&request), service.videos(&request));
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(service.provider().search_calls(), 1);
    }
}
