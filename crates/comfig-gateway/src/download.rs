//! Streaming proxy for allow-listed release assets.

use std::collections::HashSet;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        HeaderValue, StatusCode,
        header::{
            CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
        },
    },
    response::Response,
};
use tracing::{debug, info, instrument, warn};

use crate::config::DownloadConfig;
use crate::error::GatewayError;
use crate::metadata::MetadataService;
use crate::metrics;

/// `max-age` for a specific version's binary, which never changes.
pub const IMMUTABLE_MAX_AGE_SECS: u64 = 31_536_000;

const DOWNLOAD_PREFIX: &str = "/download/";
const LATEST_PREFIX: &str = "/latest/download/";
const DEV_SEGMENT: &str = "dev";

/// Upstream response headers passed through to the client.
const FORWARDED_HEADERS: [axum::http::HeaderName; 5] = [
    CONTENT_TYPE,
    CONTENT_LENGTH,
    CONTENT_DISPOSITION,
    ETAG,
    LAST_MODIFIED,
];

/// Whether a path should be handled by the download proxy at all.
pub fn is_download_path(path: &str) -> bool {
    path.starts_with("/download") || path.starts_with("/latest/download")
}

/// A validated download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// `latest` or `dev` content, which can change under the same path.
    Unversioned { upstream_url: String },
    /// A specific release; `version` must be a known release.
    Versioned {
        version: String,
        upstream_url: String,
    },
}

impl DownloadTarget {
    pub fn upstream_url(&self) -> &str {
        match self {
            Self::Unversioned { upstream_url } | Self::Versioned { upstream_url, .. } => {
                upstream_url
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Unversioned { .. } => "unversioned",
            Self::Versioned { .. } => "versioned",
        }
    }
}

/// Validates download paths and streams upstream binaries.
pub struct DownloadProxy {
    client: reqwest::Client,
    base_url: String,
    latest_base_url: String,
    assets: HashSet<String>,
    unversioned_max_age_secs: u64,
    failure_max_age_secs: u64,
}

impl DownloadProxy {
    /// Builds its own client: downloads get a connect timeout only, since a
    /// total timeout would cut off large streams.
    pub fn new(config: &DownloadConfig, user_agent: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            latest_base_url: config.latest_base_url.trim_end_matches('/').to_string(),
            assets: config.assets.iter().cloned().collect(),
            unversioned_max_age_secs: config.unversioned_max_age_secs,
            failure_max_age_secs: config.failure_max_age_secs,
        })
    }

    /// Validate the path shape, traversal and asset allow-list.
    ///
    /// Does not check the version against known releases; see [`Self::handle`].
    pub fn classify(&self, path: &str) -> Option<DownloadTarget> {
        if contains_traversal(path) {
            return None;
        }

        let asset = path.rsplit('/').next()?;
        if !self.assets.contains(asset) {
            return None;
        }

        if let Some(rest) = path.strip_prefix(LATEST_PREFIX) {
            if rest != asset {
                return None;
            }
            return Some(DownloadTarget::Unversioned {
                upstream_url: format!("{}/{asset}", self.latest_base_url),
            });
        }

        // Exactly `<version-or-dev>/<asset>` after the prefix.
        let rest = path.strip_prefix(DOWNLOAD_PREFIX)?;
        let (head, tail) = rest.split_once('/')?;
        if head.is_empty() || tail != asset {
            return None;
        }

        let upstream_url = format!("{}/{rest}", self.base_url);
        if head == DEV_SEGMENT {
            return Some(DownloadTarget::Unversioned { upstream_url });
        }
        Some(DownloadTarget::Versioned {
            version: head.to_string(),
            upstream_url,
        })
    }

    /// Proxy a download, or `None` when the request fails validation.
    #[instrument(skip(self, metadata))]
    pub async fn handle(&self, path: &str, metadata: &MetadataService) -> Option<Response> {
        let target = self.classify(path)?;

        if let DownloadTarget::Versioned { version, .. } = &target {
            let known = metadata.known_versions().await;
            if !known.iter().any(|v| v == version) {
                debug!(%version, "Rejecting download of unknown version");
                return None;
            }
        }

        Some(self.stream(&target).await)
    }

    async fn stream(&self, target: &DownloadTarget) -> Response {
        let url = target.upstream_url();
        let upstream = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Download upstream request failed");
                metrics::record_download(target.kind(), StatusCode::BAD_GATEWAY.as_u16());
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
                    .headers_mut()
                    .insert(CACHE_CONTROL, self.cache_control(target, false));
                return response;
            }
        };

        let status = upstream.status();
        info!(url, status = %status, "Streaming download");
        metrics::record_download(target.kind(), status.as_u16());

        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        let headers = response.headers_mut();
        if status.is_success() {
            for name in FORWARDED_HEADERS {
                if let Some(value) = upstream.headers().get(&name) {
                    headers.insert(name, value.clone());
                }
            }
        }
        headers.insert(
            CACHE_CONTROL,
            self.cache_control(target, status.is_success()),
        );

        // Failed fetches never expose upstream bodies.
        if status.is_success() {
            *response.body_mut() = Body::from_stream(upstream.bytes_stream());
        }
        response
    }

    fn cache_control(&self, target: &DownloadTarget, success: bool) -> HeaderValue {
        let value = match (target, success) {
            (DownloadTarget::Versioned { .. }, true) => {
                format!("public, max-age={IMMUTABLE_MAX_AGE_SECS}, immutable")
            }
            (DownloadTarget::Unversioned { .. }, true) => {
                format!("public, max-age={}", self.unversioned_max_age_secs)
            }
            (_, false) => format!("public, max-age={}", self.failure_max_age_secs),
        };
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("no-store"))
    }
}

/// Parent-directory segments, raw or percent-encoded.
fn contains_traversal(path: &str) -> bool {
    path.contains("..") || path.to_ascii_lowercase().contains("%2e")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy() -> DownloadProxy {
        DownloadProxy::new(&DownloadConfig::default(), "comfig-gateway-test").unwrap()
    }

    #[test]
    fn traversal_is_rejected() {
        let proxy = proxy();
        assert_eq!(proxy.classify("/download/../../etc/passwd"), None);
        assert_eq!(proxy.classify("/download/../mastercomfig-base.vpk"), None);
        assert_eq!(proxy.classify("/download/%2E%2E/mastercomfig-base.vpk"), None);
        assert_eq!(proxy.classify("/latest/download/..%2fmastercomfig-base.vpk"), None);
    }

    #[test]
    fn unknown_assets_are_rejected() {
        let proxy = proxy();
        assert_eq!(proxy.classify("/download/9.9.9/evil.exe"), None);
        assert_eq!(proxy.classify("/download/dev/evil.exe"), None);
        assert_eq!(proxy.classify("/latest/download/evil.exe"), None);
    }

    #[test]
    fn dev_and_latest_are_unversioned() {
        let proxy = proxy();
        assert_eq!(
            proxy.classify("/download/dev/mastercomfig-base.vpk"),
            Some(DownloadTarget::Unversioned {
                upstream_url:
                    "https://github.com/mastercomfig/mastercomfig/releases/download/dev/mastercomfig-base.vpk"
                        .into()
            })
        );
        assert_eq!(
            proxy.classify("/latest/download/mastercomfig-low-preset.vpk"),
            Some(DownloadTarget::Unversioned {
                upstream_url:
                    "https://github.com/mastercomfig/mastercomfig/releases/latest/download/mastercomfig-low-preset.vpk"
                        .into()
            })
        );
    }

    #[test]
    fn versioned_paths_extract_version() {
        let target = proxy()
            .classify("/download/9.9.9/mastercomfig-base.vpk")
            .unwrap();
        assert_eq!(
            target,
            DownloadTarget::Versioned {
                version: "9.9.9".into(),
                upstream_url:
                    "https://github.com/mastercomfig/mastercomfig/releases/download/9.9.9/mastercomfig-base.vpk"
                        .into()
            }
        );
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let proxy = proxy();
        assert_eq!(proxy.classify("/download/mastercomfig-base.vpk"), None);
        assert_eq!(proxy.classify("/download//mastercomfig-base.vpk"), None);
        assert_eq!(proxy.classify("/downloads/9.9.9/mastercomfig-base.vpk"), None);
        assert_eq!(
            proxy.classify("/latest/download/extra/mastercomfig-base.vpk"),
            None
        );
        assert_eq!(proxy.classify("/download/dev/a/b/mastercomfig-base.vpk"), None);
        assert_eq!(proxy.classify("/download/9.9.9/foo/mastercomfig-base.vpk"), None);
        assert!(matches!(
            proxy.classify("/download/devel/mastercomfig-base.vpk"),
            Some(DownloadTarget::Versioned { .. })
        ));
    }

    #[test]
    fn cache_lifetimes_follow_target_and_outcome() {
        let proxy = proxy();
        let versioned = DownloadTarget::Versioned {
            version: "9.9.9".into(),
            upstream_url: String::new(),
        };
        let unversioned = DownloadTarget::Unversioned {
            upstream_url: String::new(),
        };

        assert_eq!(
            proxy.cache_control(&versioned, true),
            "public, max-age=31536000, immutable"
        );
        assert_eq!(proxy.cache_control(&unversioned, true), "public, max-age=3600");
        assert_eq!(proxy.cache_control(&versioned, false), "public, max-age=60");
        assert_eq!(proxy.cache_control(&unversioned, false), "public, max-age=60");
    }
}
