//! Metadata resolution for downloads.
//!
//! Availability can change between requests, so nothing here is cached: every
//! download asks the provider again. Provider failures are normalized into
//! [`ServiceError::NotFound`] or [`ServiceError::Upstream`] so callers never
//! see provider-specific error types.

use crate::{
    error::ServiceError,
    provider::{Provider, ProviderError, VideoMetadata},
};

pub struct MetadataResolver<'a, P> {
    provider: &'a P,
}

impl<'a, P: Provider> MetadataResolver<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    pub async fn resolve(&self, video_id: &str) -> Result<VideoMetadata, ServiceError> {
        self.provider
            .basic_info(video_id)
            .await
            .map_err(|err| normalize(video_id, err))
    }
}

pub(crate) fn normalize(video_id: &str, err: ProviderError) -> ServiceError {
    match err {
        ProviderError::Unavailable(reason) => {
            let message = if reason.is_empty() {
                format!("No video id found: {video_id}")
            } else {
                reason
            };
            ServiceError::NotFound(message)
        }
        ProviderError::Failed(reason) => ServiceError::Upstream(reason),
    }
}
