//! Logical resources, versioned cache keys and upstream descriptors.

use std::fmt;

use reqwest::header::HeaderMap;

/// Protocol version used when a client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 2;

/// One of the three upstream-sourced metadata sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalResource {
    ReleaseVersions,
    Modules,
    PresetModules,
}

impl LogicalResource {
    /// Positional order shared by fetch slots, fetch results and the composite.
    pub const ALL: [LogicalResource; 3] = [
        LogicalResource::ReleaseVersions,
        LogicalResource::Modules,
        LogicalResource::PresetModules,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ReleaseVersions => "versions",
            Self::Modules => "modules",
            Self::PresetModules => "preset-modules",
        }
    }

    pub fn key(self, version: u32) -> VersionedKey {
        VersionedKey::new(self.name(), version)
    }
}

impl fmt::Display for LogicalResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache identity of a logical resource: `<name>-<protocol version>`.
///
/// Used verbatim by both cache tiers. Bumping the protocol version yields a
/// disjoint namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey(String);

impl VersionedKey {
    pub fn new(name: &str, version: u32) -> Self {
        Self(format!("{name}-{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Post-processing applied to a successful upstream body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Reduce a GitHub release listing to the newest stable version names.
    ReleaseVersions,
}

/// Where and how to fetch one logical resource.
#[derive(Debug, Clone)]
pub struct UpstreamDescriptor {
    pub resource: LogicalResource,
    pub url: String,
    pub headers: HeaderMap,
    /// `None` fetches without persisting (tag-scoped requests).
    pub key: Option<VersionedKey>,
    /// `None` passes a validated JSON body through unchanged.
    pub transform: Option<Transform>,
}

/// A positional entry handed to the upstream fetcher.
#[derive(Debug, Clone)]
pub enum FetchSlot {
    Fetch(UpstreamDescriptor),
    /// The caller already holds a fresh cached value for this position.
    Skip,
}

/// Ref name used for tag-scoped metadata requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag(String);

impl Tag {
    /// Accepts a ref name unless it could escape the repository path.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw == "." || raw.contains("..") || raw.contains('/') {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
