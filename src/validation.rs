//! Request shapes accepted at the HTTP boundary and their validation.
//!
//! Extractors deserialize into the loose `*Body` / `*Query` structs, and the
//! functions here turn them into typed requests or a [`ValidationError`]
//! naming the first offending field. The core only ever sees the typed
//! requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ValidationError, pipeline::MediaKind};

/// Raw body of `POST /suggestions` and `POST /videos`.
#[derive(Debug, Default, Deserialize)]
pub struct LookupBody {
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub limit: Option<Value>,
}

/// A validated search or suggestion lookup. Serialized form doubles as the
/// cache key parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Raw query string of `GET /download`.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub prevent_download: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub video_id: String,
    pub kind: MediaKind,
    /// Set when the caller asked for the body without an attachment header.
    pub suppress_disposition: bool,
}

pub fn validate_lookup(body: LookupBody) -> Result<LookupRequest, ValidationError> {
    let query = match body.query {
        Some(Value::String(query)) => query,
        _ => return Err(ValidationError::new("query must be a string")),
    };
    if query.is_empty() {
        return Err(ValidationError::new(
            "query must be longer than or equal to 1 characters",
        ));
    }

    let limit = match body.limit {
        None | Some(Value::Null) => None,
        Some(Value::Number(number)) => Some(positive_integer("limit", &number)?),
        Some(_) => return Err(ValidationError::new("limit must be an integer number")),
    };

    Ok(LookupRequest { query, limit })
}

fn positive_integer(field: &str, number: &serde_json::Number) -> Result<usize, ValidationError> {
    if let Some(value) = number.as_u64() {
        return match value {
            0 => Err(ValidationError::new(format!("{field} must be a positive number"))),
            value => usize::try_from(value)
                .map_err(|_| ValidationError::new(format!("{field} is too large"))),
        };
    }
    if number.as_i64().is_some() {
        return Err(ValidationError::new(format!("{field} must be a positive number")));
    }
    match number.as_f64() {
        Some(value) if value.fract() == 0.0 && value > 0.0 && value <= usize::MAX as f64 => {
            Ok(value as usize)
        }
        Some(value) if value.fract() == 0.0 => {
            Err(ValidationError::new(format!("{field} must be a positive number")))
        }
        _ => Err(ValidationError::new(format!("{field} must be an integer number"))),
    }
}

pub fn validate_download(query: DownloadQuery) -> Result<DownloadRequest, ValidationError> {
    let video_id = match query.video_id {
        Some(id) if !id.is_empty() => id,
        Some(_) => {
            return Err(ValidationError::new(
                "video_id must be longer than or equal to 1 characters",
            ));
        }
        None => return Err(ValidationError::new("video_id must be a string")),
    };

    let kind = match query.kind.as_deref() {
        Some("audio") => MediaKind::Audio,
        Some("video") => MediaKind::Video,
        _ => {
            return Err(ValidationError::new(
                "type must be one of the following values: video, audio",
            ));
        }
    };

    let suppress_disposition = match query.prevent_download.as_deref() {
        None | Some("false") => false,
        Some("true") => true,
        Some(_) => {
            return Err(ValidationError::new(
                "prevent_download must be one of the following values: true, false",
            ));
        }
    };

    Ok(DownloadRequest {
        video_id,
        kind,
        suppress_disposition,
    })
}
