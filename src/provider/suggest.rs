//! Search-suggestion lookups over HTTP.
//!
//! The endpoint answers with `[query, [suggestion, ...], ...]`. Requests are
//! made with the blocking `ureq` agent on tokio's blocking pool.

use serde_json::Value;
use tokio::task;

use super::ProviderError;

pub const DEFAULT_SUGGEST_ENDPOINT: &str = "http://suggestqueries.google.com/complete/search";

#[derive(Clone)]
pub struct SuggestClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl SuggestClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn fetch(&self, query: &str) -> Result<Vec<String>, ProviderError> {
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let query = query.to_owned();
        task::spawn_blocking(move || fetch_blocking(&agent, &endpoint, &query))
            .await
            .map_err(|err| ProviderError::Failed(format!("task join error: {err}")))?
    }
}

impl Default for SuggestClient {
    fn default() -> Self {
        Self::new(DEFAULT_SUGGEST_ENDPOINT)
    }
}

fn fetch_blocking(
    agent: &ureq::Agent,
    endpoint: &str,
    query: &str,
) -> Result<Vec<String>, ProviderError> {
    let response = agent
        .get(endpoint)
        .query_pairs(query_params(query))
        .call()
        .map_err(|err| ProviderError::Failed(format!("suggestion request failed: {err}")))?;

    let body = response
        .into_string()
        .map_err(|err| ProviderError::Failed(format!("reading suggestion response: {err}")))?;
    parse_suggestions(&body)
}

/// Query string for one lookup; `client=firefox` selects the plain JSON
/// array response.
fn query_params(query: &str) -> [(&'static str, &str); 3] {
    [("client", "firefox"), ("hl", "en"), ("q", query)]
}

/// Extracts the suggestion list and decodes `\uXXXX` sequences that the
/// endpoint sometimes leaves escaped inside the strings.
pub fn parse_suggestions(body: &str) -> Result<Vec<String>, ProviderError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| ProviderError::Failed(format!("parsing suggestion response: {err}")))?;

    let list = value
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Failed("suggestion response has no list".into()))?;

    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .map(decode_unicode_escapes)
        .collect())
}

pub fn decode_unicode_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("\\u") {
        out.push_str(&rest[..pos]);
        let candidate = &rest[pos + 2..];
        let decoded = candidate
            .get(..4)
            .filter(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &candidate[4..];
            }
            None => {
                out.push_str("\\u");
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}
