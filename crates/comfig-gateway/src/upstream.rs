//! Concurrent upstream fetching with cached fallback.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, instrument, warn};

use crate::assemble::apply_transform;
use crate::cache::CacheStore;
use crate::error::GatewayError;
use crate::metrics;
use crate::resource::{FetchSlot, UpstreamDescriptor};

/// What came back for one slot before any processing.
enum Fetched {
    Skipped,
    Body(String),
    Failed,
}

/// Fetches logical resources from upstream and keeps the durable tier current.
///
/// ## Failure policy
///
/// - A single request failing (connect error, timeout, non-2xx status, body
///   read error) only affects its own slot, which falls back to the durable
///   tier's value for its key.
/// - An error while *processing* the gathered responses (malformed payload,
///   durable tier read/write failure) degrades the whole batch to all-`None`.
///   Callers then fall back to the values they already hold.
pub struct UpstreamFetcher {
    client: reqwest::Client,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl UpstreamFetcher {
    pub fn new(client: reqwest::Client, store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { client, store, ttl }
    }

    /// Fetch every `Fetch` slot concurrently.
    ///
    /// The result has one entry per slot, in input order. `Skip` slots yield
    /// `None`.
    #[instrument(skip_all, fields(slots = slots.len()))]
    pub async fn fetch_all(&self, slots: Vec<FetchSlot>) -> Vec<Option<String>> {
        let len = slots.len();
        match self.gather(slots).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Upstream batch failed, degrading to cached fallback");
                metrics::record_batch_failure();
                vec![None; len]
            }
        }
    }

    async fn gather(&self, slots: Vec<FetchSlot>) -> Result<Vec<Option<String>>, GatewayError> {
        let responses = join_all(slots.iter().map(|slot| async move {
            match slot {
                FetchSlot::Fetch(descriptor) => self.fetch_one(descriptor).await,
                FetchSlot::Skip => Fetched::Skipped,
            }
        }))
        .await;

        let mut results = Vec::with_capacity(slots.len());
        for (slot, fetched) in slots.into_iter().zip(responses) {
            let value = match (slot, fetched) {
                (FetchSlot::Skip, _) | (_, Fetched::Skipped) => None,
                (FetchSlot::Fetch(descriptor), Fetched::Body(body)) => {
                    self.store_fresh(&descriptor, &body).await?
                }
                (FetchSlot::Fetch(descriptor), Fetched::Failed) => match &descriptor.key {
                    Some(key) => self.store.get(key).await?,
                    None => None,
                },
            };
            results.push(value);
        }
        Ok(results)
    }

    async fn fetch_one(&self, descriptor: &UpstreamDescriptor) -> Fetched {
        let resource = descriptor.resource.name();
        let response = match self
            .client
            .get(&descriptor.url)
            .headers(descriptor.headers.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(resource, url = %descriptor.url, error = %e, "Upstream request failed");
                metrics::record_upstream_fetch(resource, "error");
                return Fetched::Failed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(resource, url = %descriptor.url, status = %status, "Upstream returned error status");
            metrics::record_upstream_fetch(resource, "status");
            return Fetched::Failed;
        }

        match response.text().await {
            Ok(body) => {
                debug!(resource, bytes = body.len(), "Upstream fetch succeeded");
                metrics::record_upstream_fetch(resource, "ok");
                Fetched::Body(body)
            }
            Err(e) => {
                warn!(resource, error = %e, "Failed to read upstream body");
                metrics::record_upstream_fetch(resource, "error");
                Fetched::Failed
            }
        }
    }

    async fn store_fresh(
        &self,
        descriptor: &UpstreamDescriptor,
        body: &str,
    ) -> Result<Option<String>, GatewayError> {
        let value = apply_transform(descriptor.resource, descriptor.transform, body)?;
        if let (Some(key), Some(value)) = (&descriptor.key, &value) {
            self.store.put(key, value, self.ttl).await?;
        }
        Ok(value)
    }
}
