//! In-process mirror of the last assembled composite response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

use crate::metrics;

#[derive(Debug)]
struct ProcessEntry {
    protocol_version: u32,
    body: Arc<str>,
    stored_at: Instant,
}

/// Single-slot, most-recent-wins cache for the composite `{v,m,p}` payload.
///
/// Constructed once per running instance and injected through `AppState`.
/// Reads and writes are lock-free; concurrent writers simply replace each
/// other. The slot remembers the protocol version it was assembled for and
/// never answers a request for a different one.
#[derive(Debug)]
pub struct ProcessCache {
    slot: ArcSwapOption<ProcessEntry>,
    ttl: Duration,
}

impl ProcessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            ttl,
        }
    }

    /// Returns the cached body if it matches `protocol_version` and is fresh.
    pub fn get(&self, protocol_version: u32) -> Option<Arc<str>> {
        let guard = self.slot.load();
        let hit = guard
            .as_ref()
            .filter(|entry| {
                entry.protocol_version == protocol_version && entry.stored_at.elapsed() <= self.ttl
            })
            .map(|entry| Arc::clone(&entry.body));

        if hit.is_some() {
            metrics::record_cache_hit("process");
        } else {
            metrics::record_cache_miss("process");
        }
        hit
    }

    pub fn put(&self, protocol_version: u32, body: Arc<str>) {
        self.slot.store(Some(Arc::new(ProcessEntry {
            protocol_version,
            body,
            stored_at: Instant::now(),
        })));
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
