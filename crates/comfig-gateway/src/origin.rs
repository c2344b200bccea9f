//! Cross-origin caller tables and the response headers derived from them.

use std::collections::HashSet;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
            ACCESS_CONTROL_REQUEST_METHOD, ALLOW, CONTENT_SECURITY_POLICY, ORIGIN, VARY,
        },
    },
    response::Response,
};

use crate::config::OriginsConfig;

pub const CROSS_ORIGIN_RESOURCE_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-resource-policy");

/// Methods the gateway answers.
pub const ALLOWED_METHODS: &str = "GET, HEAD, POST, OPTIONS";

const CSP: &str = "default-src 'none'; frame-ancestors 'none'";
const VARY_VALUE: &str = "Accept-Encoding, Origin";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// How a caller's `Origin` header is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginClass {
    /// Absent, or not on the allow-list.
    Unlisted,
    /// CORS-enabled.
    Allowed,
    /// CORS-enabled and pinned with a same-origin resource policy.
    Secure,
}

/// Allowed and secure origin tables.
///
/// Secure origins are always also allowed; the constructor enforces it.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
    secure: HashSet<String>,
}

impl OriginPolicy {
    pub fn new<I, J>(allowed: I, secure: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        let secure: HashSet<String> = secure.into_iter().collect();
        let mut allowed: HashSet<String> = allowed.into_iter().collect();
        allowed.extend(secure.iter().cloned());
        Self { allowed, secure }
    }

    pub fn from_config(config: &OriginsConfig) -> Self {
        Self::new(config.allowed.clone(), config.secure.clone())
    }

    pub fn classify(&self, origin: Option<&str>) -> OriginClass {
        match origin {
            Some(o) if self.secure.contains(o) => OriginClass::Secure,
            Some(o) if self.allowed.contains(o) => OriginClass::Allowed,
            _ => OriginClass::Unlisted,
        }
    }

    /// Add the headers every routed response carries.
    ///
    /// `Access-Control-Allow-Origin` is only echoed for allow-listed origins;
    /// the same-origin resource policy goes to secure and unlisted callers.
    pub fn apply_headers(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        apply_base_headers(headers);
        let class = self.classify(origin);

        if matches!(class, OriginClass::Allowed | OriginClass::Secure)
            && let Some(value) = origin.and_then(|o| HeaderValue::from_str(o).ok())
        {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        if matches!(class, OriginClass::Secure | OriginClass::Unlisted) {
            headers.insert(
                CROSS_ORIGIN_RESOURCE_POLICY,
                HeaderValue::from_static("same-origin"),
            );
        }
    }

    /// Answer an `OPTIONS` request.
    ///
    /// A CORS preflight needs `Origin`, `Access-Control-Request-Method` and
    /// `Access-Control-Request-Headers` and an allow-listed origin; anything
    /// else gets the generic options response.
    pub fn options_response(&self, request_headers: &HeaderMap) -> Response {
        let origin = request_headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        let requested_headers = request_headers.get(ACCESS_CONTROL_REQUEST_HEADERS);
        let is_preflight = origin.is_some()
            && request_headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
            && requested_headers.is_some()
            && self.classify(origin) != OriginClass::Unlisted;

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();

        if is_preflight {
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            if let Some(requested) = requested_headers {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            }
            headers.insert(
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            );
        } else {
            headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        self.apply_headers(origin, headers);
        response
    }
}

/// Content security policy and `Vary`, present on every response.
pub fn apply_base_headers(headers: &mut HeaderMap) {
    headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(CSP));
    headers.insert(VARY, HeaderValue::from_static(VARY_VALUE));
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &str = "http://localhost:4321";
    const SECURE: &str = "https://comfig.app";

    fn policy() -> OriginPolicy {
        OriginPolicy::new([ALLOWED.to_string()], [SECURE.to_string()])
    }

    fn preflight_headers(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers.insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("GET"));
        headers.insert(
            ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("content-type"),
        );
        headers
    }

    #[test]
    fn secure_origins_are_allowed() {
        let policy = policy();
        assert_eq!(policy.classify(Some(SECURE)), OriginClass::Secure);
        assert_eq!(policy.classify(Some(ALLOWED)), OriginClass::Allowed);
        assert_eq!(policy.classify(Some("https://evil.example")), OriginClass::Unlisted);
        assert_eq!(policy.classify(None), OriginClass::Unlisted);
    }

    #[test]
    fn preflight_from_unlisted_origin_gets_no_cors() {
        let response = policy().options_response(&preflight_headers("https://evil.example"));
        let headers = response.headers();

        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).is_none());
        assert_eq!(headers[ALLOW], ALLOWED_METHODS);
        assert_eq!(headers[CROSS_ORIGIN_RESOURCE_POLICY], "same-origin");
    }

    #[test]
    fn preflight_from_allowed_origin_has_cors_without_resource_policy() {
        let response = policy().options_response(&preflight_headers(ALLOWED));
        let headers = response.headers();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert!(headers.get(CROSS_ORIGIN_RESOURCE_POLICY).is_none());
    }

    #[test]
    fn preflight_from_secure_origin_has_both() {
        let response = policy().options_response(&preflight_headers(SECURE));
        let headers = response.headers();

        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], SECURE);
        assert_eq!(headers[CROSS_ORIGIN_RESOURCE_POLICY], "same-origin");
    }

    #[test]
    fn incomplete_preflight_is_generic_options() {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static(ALLOWED));
        let response = policy().options_response(&headers);

        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_METHODS).is_none());
        assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
        // Still an allowed origin for the response itself.
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], ALLOWED);
    }

    #[test]
    fn base_headers_always_present() {
        let mut headers = HeaderMap::new();
        policy().apply_headers(None, &mut headers);
        assert_eq!(headers[CONTENT_SECURITY_POLICY], CSP);
        assert_eq!(headers[VARY], VARY_VALUE);
        assert_eq!(headers[CROSS_ORIGIN_RESOURCE_POLICY], "same-origin");
    }
}
