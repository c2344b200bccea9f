//! Periodic forced refresh of the default metadata.
//!
//! The first tick fires immediately, so starting the scheduler also warms
//! both cache tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

use crate::metadata::MetadataService;
use crate::resource::DEFAULT_PROTOCOL_VERSION;

pub struct RefreshScheduler {
    metadata: Arc<MetadataService>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(metadata: Arc<MetadataService>, interval: Duration) -> Self {
        Self { metadata, interval }
    }

    /// Start the scheduler in a background task.
    ///
    /// Returns a shutdown sender; send `true` to stop it.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                "Refresh scheduler started"
            );

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.metadata.refresh(DEFAULT_PROTOCOL_VERSION, "schedule").await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Refresh scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCacheStore, ProcessCache};
    use crate::config::UpstreamConfig;
    use crate::upstream::UpstreamFetcher;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn first_tick_warms_process_cache() {
        let server = MockServer::start().await;
        for (route, body) in [
            ("/releases", r#"[{"tag_name":"v9.9.9"}]"#),
            ("/modules.json", "{}"),
            ("/presets.json", "{}"),
        ] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let process = Arc::new(ProcessCache::new(Duration::from_secs(60)));
        let upstream = UpstreamConfig {
            releases_url: format!("{}/releases", server.uri()),
            modules_url: format!("{}/modules.json", server.uri()),
            presets_url: format!("{}/presets.json", server.uri()),
            ..UpstreamConfig::default()
        };
        let fetcher = UpstreamFetcher::new(
            reqwest::Client::new(),
            Arc::clone(&store),
            Duration::from_secs(60),
        );
        let metadata = Arc::new(
            MetadataService::new(store, Arc::clone(&process), fetcher, upstream).unwrap(),
        );

        let shutdown = RefreshScheduler::new(metadata, Duration::from_secs(3600)).start();

        let mut warmed = None;
        for _ in 0..50 {
            if let Some(body) = process.get(DEFAULT_PROTOCOL_VERSION) {
                warmed = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = shutdown.send(true);

        assert_eq!(warmed.as_deref(), Some(r#"{"v":["9.9.9"],"m":{},"p":{}}"#));
    }
}
