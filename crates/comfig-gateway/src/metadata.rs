//! Composite metadata retrieval over both cache tiers.

use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument, warn};

use crate::assemble::{CompositeVersions, ResourceValues, assemble};
use crate::cache::{CacheStore, ProcessCache};
use crate::config::{REF_PLACEHOLDER, UpstreamConfig};
use crate::error::GatewayError;
use crate::metrics;
use crate::resource::{
    DEFAULT_PROTOCOL_VERSION, FetchSlot, LogicalResource, Tag, Transform, UpstreamDescriptor,
    VersionedKey,
};
use crate::upstream::UpstreamFetcher;

/// Where a descriptor should read a resource from.
#[derive(Debug, Clone, Copy)]
enum Channel<'a> {
    /// Latest release, persisted under the versioned key.
    Default,
    /// A specific git ref, never persisted.
    Tagged(&'a Tag),
}

/// Serves the `{v,m,p}` composite for a protocol version.
pub struct MetadataService {
    store: Arc<dyn CacheStore>,
    process: Arc<ProcessCache>,
    fetcher: UpstreamFetcher,
    upstream: UpstreamConfig,
    github_headers: HeaderMap,
}

impl MetadataService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        process: Arc<ProcessCache>,
        fetcher: UpstreamFetcher,
        upstream: UpstreamConfig,
    ) -> Result<Self, GatewayError> {
        let mut github_headers = HeaderMap::new();
        github_headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = upstream.github_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                GatewayError::Configuration("upstream.github_token is not a valid header value".into())
            })?;
            value.set_sensitive(true);
            github_headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            store,
            process,
            fetcher,
            upstream,
            github_headers,
        })
    }

    /// Default read path.
    ///
    /// A fresh process-tier entry is returned without touching the durable
    /// tier. Otherwise each resource is read from the durable tier and only
    /// the missing ones are fetched upstream.
    #[instrument(skip(self))]
    pub async fn cached(&self, version: u32) -> Arc<str> {
        if let Some(body) = self.process.get(version) {
            debug!("Serving composite from process cache");
            return body;
        }

        let existing = self.read_durable(version).await;
        let slots = LogicalResource::ALL
            .into_iter()
            .map(|resource| match existing.get(resource) {
                Some(_) => FetchSlot::Skip,
                None => FetchSlot::Fetch(self.descriptor(resource, version, Channel::Default)),
            })
            .collect();
        let fetched = ResourceValues::from_positional(self.fetcher.fetch_all(slots).await);

        // Null fields are part of the payload, so partial composites are mirrored too.
        let body: Arc<str> = Arc::from(assemble(fetched, existing));
        self.process.put(version, Arc::clone(&body));
        body
    }

    /// Forced refresh: fetch everything upstream, bypassing both cache tiers.
    ///
    /// The assembled result always replaces the process-tier slot. Fields the
    /// batch could not produce at all are filled from the durable tier.
    #[instrument(skip(self))]
    pub async fn refresh(&self, version: u32, trigger: &'static str) {
        metrics::record_refresh(trigger);
        let slots = LogicalResource::ALL
            .into_iter()
            .map(|resource| FetchSlot::Fetch(self.descriptor(resource, version, Channel::Default)))
            .collect();
        let fetched = ResourceValues::from_positional(self.fetcher.fetch_all(slots).await);

        let values = if fetched.is_complete() {
            fetched
        } else {
            fetched.or(self.read_durable(version).await)
        };
        let complete = values.is_complete();
        let body = assemble(values, ResourceValues::default());
        self.process.put(version, Arc::from(body));

        if complete {
            info!(trigger, "Metadata refreshed");
        } else {
            warn!(trigger, "Metadata refresh incomplete, serving partial composite");
        }
    }

    /// Tag-scoped read: modules and presets come from `tag`'s ref and are
    /// never persisted; the version list may still be served from cache.
    /// Neither cache tier receives the composite.
    #[instrument(skip(self), fields(tag = tag.as_str()))]
    pub async fn tagged(&self, tag: &Tag, version: u32) -> String {
        let versions_key = LogicalResource::ReleaseVersions.key(version);
        let cached_versions = self.read_or_absent(&versions_key).await;

        let versions_slot = match cached_versions {
            Some(_) => FetchSlot::Skip,
            None => FetchSlot::Fetch(self.descriptor(
                LogicalResource::ReleaseVersions,
                version,
                Channel::Default,
            )),
        };
        let slots = vec![
            versions_slot,
            FetchSlot::Fetch(self.descriptor(LogicalResource::Modules, version, Channel::Tagged(tag))),
            FetchSlot::Fetch(self.descriptor(
                LogicalResource::PresetModules,
                version,
                Channel::Tagged(tag),
            )),
        ];
        let fetched = ResourceValues::from_positional(self.fetcher.fetch_all(slots).await);

        assemble(
            fetched,
            ResourceValues {
                versions: cached_versions,
                ..ResourceValues::default()
            },
        )
    }

    /// Release versions currently advertised on the default channel.
    pub async fn known_versions(&self) -> Vec<String> {
        let body = self.cached(DEFAULT_PROTOCOL_VERSION).await;
        match serde_json::from_str::<CompositeVersions>(&body) {
            Ok(composite) => composite.versions.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Composite payload did not parse");
                Vec::new()
            }
        }
    }

    async fn read_durable(&self, version: u32) -> ResourceValues {
        let values = join_all(
            LogicalResource::ALL
                .into_iter()
                .map(|resource| async move { self.read_or_absent(&resource.key(version)).await }),
        )
        .await;
        ResourceValues::from_positional(values)
    }

    async fn read_or_absent(&self, key: &VersionedKey) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Durable cache read failed, treating as absent");
                None
            }
        }
    }

    fn descriptor(
        &self,
        resource: LogicalResource,
        version: u32,
        channel: Channel<'_>,
    ) -> UpstreamDescriptor {
        let tagged = |template: &str, tag: &Tag| {
            template.replace(REF_PLACEHOLDER, &urlencoding::encode(tag.as_str()))
        };
        let (url, headers, transform) = match (resource, channel) {
            (LogicalResource::ReleaseVersions, _) => (
                self.upstream.releases_url.clone(),
                self.github_headers.clone(),
                Some(Transform::ReleaseVersions),
            ),
            (LogicalResource::Modules, Channel::Default) => {
                (self.upstream.modules_url.clone(), HeaderMap::new(), None)
            }
            (LogicalResource::PresetModules, Channel::Default) => {
                (self.upstream.presets_url.clone(), HeaderMap::new(), None)
            }
            (LogicalResource::Modules, Channel::Tagged(tag)) => {
                (tagged(&self.upstream.tagged_modules_url, tag), HeaderMap::new(), None)
            }
            (LogicalResource::PresetModules, Channel::Tagged(tag)) => {
                (tagged(&self.upstream.tagged_presets_url, tag), HeaderMap::new(), None)
            }
        };
        let key = match channel {
            Channel::Default => Some(resource.key(version)),
            Channel::Tagged(_) => None,
        };

        UpstreamDescriptor {
            resource,
            url,
            headers,
            key,
            transform,
        }
    }
}
