use thiserror::Error;

use crate::cache::CacheError;

/// Errors raised inside the gateway.
///
/// None of these are rendered to clients; callers degrade to cached or null
/// values and log the error instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("invalid upstream payload for {resource}: {source}")]
    Payload {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn payload(resource: &'static str, source: serde_json::Error) -> Self {
        Self::Payload { resource, source }
    }
}
