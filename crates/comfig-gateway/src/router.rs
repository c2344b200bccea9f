//! Request dispatch.
//!
//! Every request lands in [`dispatch`] through the router fallback. Order:
//!
//! 1. `OPTIONS` → preflight or generic options response
//! 2. anything but `GET`/`HEAD`/`POST` → 405
//! 3. download paths → download proxy; a request that fails validation gets
//!    the 405 denial
//! 4. valid `t` query parameter → tag-scoped metadata
//! 5. `POST /<webhook secret>` → forced refresh, then default metadata
//! 6. default metadata for the requested protocol version

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{ALLOW, CONTENT_TYPE, ORIGIN},
    },
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::download::is_download_path;
use crate::origin::{ALLOWED_METHODS, apply_base_headers};
use crate::resource::{DEFAULT_PROTOCOL_VERSION, Tag};
use crate::server::AppState;
use crate::webhook::authenticate;

/// Query parameters understood on metadata requests.
///
/// Both are kept as raw strings so an unparsable value only disables its own
/// feature instead of failing the whole query.
#[derive(Debug, Default, Deserialize)]
struct MetadataQuery {
    /// Git ref to read modules and presets from.
    t: Option<String>,
    /// Protocol version.
    v: Option<String>,
}

pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let method = req.method().clone();

    if method == Method::OPTIONS {
        return state.origins.options_response(req.headers());
    }
    if !matches!(method, Method::GET | Method::HEAD | Method::POST) {
        return method_not_allowed();
    }

    let origin = origin_of(req.headers());
    let path = req.uri().path();

    let mut response = if is_download_path(path) {
        if method == Method::POST {
            return method_not_allowed();
        }
        match state.downloads.handle(path, &state.metadata).await {
            Some(response) => response,
            None => return method_not_allowed(),
        }
    } else {
        let query = Query::<MetadataQuery>::try_from_uri(req.uri())
            .map(|Query(q)| q)
            .unwrap_or_default();
        let version = protocol_version(query.v.as_deref(), &state.protocol_versions);

        if let Some(tag) = query.t.as_deref().and_then(Tag::parse) {
            json_response(state.metadata.tagged(&tag, version).await)
        } else {
            if method == Method::POST && is_webhook(path, state.webhook_path.as_deref()) {
                state.metadata.refresh(version, "webhook").await;
            }
            json_response(state.metadata.cached(version).await.to_string())
        }
    };

    state
        .origins
        .apply_headers(origin.as_deref(), response.headers_mut());
    response
}

/// Fixed denial: `Allow` plus the base headers, nothing origin-specific.
pub fn method_not_allowed() -> Response {
    let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    apply_base_headers(headers);
    response
}

fn json_response(body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn origin_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Requested protocol version, or the default when absent or unsupported.
fn protocol_version(raw: Option<&str>, supported: &[u32]) -> u32 {
    raw.and_then(|v| v.parse::<u32>().ok())
        .filter(|v| supported.contains(v))
        .unwrap_or(DEFAULT_PROTOCOL_VERSION)
}

fn is_webhook(path: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let accepted = authenticate(path.trim_start_matches('/'), secret);
    if accepted {
        debug!("Webhook accepted");
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::origin::CROSS_ORIGIN_RESOURCE_POLICY;
    use crate::server::build_app;
    use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_SECURITY_POLICY, VARY};
    use tower::ServiceExt;

    #[test]
    fn unsupported_protocol_versions_use_default() {
        let supported = [1, 2];
        assert_eq!(protocol_version(None, &supported), 2);
        assert_eq!(protocol_version(Some("1"), &supported), 1);
        assert_eq!(protocol_version(Some("7"), &supported), 2);
        assert_eq!(protocol_version(Some("two"), &supported), 2);
    }

    #[test]
    fn webhook_requires_configured_secret() {
        assert!(!is_webhook("/anything", None));
        assert!(is_webhook("/s3cr3t", Some("s3cr3t")));
        assert!(!is_webhook("/s3cr3", Some("s3cr3t")));
        assert!(!is_webhook("/", Some("s3cr3t")));
    }

    #[test]
    fn denial_has_minimal_headers() {
        let response = method_not_allowed();
        let headers = response.headers();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[ALLOW], ALLOWED_METHODS);
        assert!(headers.contains_key(CONTENT_SECURITY_POLICY));
        assert!(headers.contains_key(VARY));
        assert!(!headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
        assert!(!headers.contains_key(CROSS_ORIGIN_RESOURCE_POLICY));
    }

    async fn app() -> axum::Router {
        let mut cfg = AppConfig::default();
        // Nothing in these tests may reach the network.
        cfg.upstream.releases_url = "http://127.0.0.1:9/releases".into();
        cfg.upstream.modules_url = "http://127.0.0.1:9/modules.json".into();
        cfg.upstream.presets_url = "http://127.0.0.1:9/presets.json".into();
        cfg.upstream.timeout_ms = 200;
        build_app(AppState::from_config(&cfg).await.unwrap())
    }

    #[tokio::test]
    async fn unsupported_method_is_denied() {
        let response = app()
            .await
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::DELETE)
                    .uri("/")
                    .header(ORIGIN, "https://comfig.app")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(!response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn traversal_download_is_denied() {
        let response = app()
            .await
            .oneshot(
                axum::http::Request::builder()
                    .uri("/download/../../etc/passwd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
    }

    #[tokio::test]
    async fn post_download_is_denied() {
        let response = app()
            .await
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::POST)
                    .uri("/download/dev/mastercomfig-base.vpk")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metadata_with_unreachable_upstream_is_all_null() {
        let response = app()
            .await
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .header(ORIGIN, "https://comfig.app")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://comfig.app");
        assert_eq!(headers[CROSS_ORIGIN_RESOURCE_POLICY], "same-origin");
        assert!(headers.contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"v":null,"m":null,"p":null}"#);
    }
}
