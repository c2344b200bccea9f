use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, middleware};
use tower_http::{
    compression::{
        CompressionLayer,
        predicate::{DefaultPredicate, NotForContentType, Predicate},
    },
    trace::TraceLayer,
};

use crate::cache::{ProcessCache, create_cache_store};
use crate::config::AppConfig;
use crate::download::DownloadProxy;
use crate::error::GatewayError;
use crate::metadata::MetadataService;
use crate::middleware as app_middleware;
use crate::origin::OriginPolicy;
use crate::router;
use crate::scheduler::RefreshScheduler;
use crate::upstream::UpstreamFetcher;

/// Shared, request-independent handles. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<MetadataService>,
    pub downloads: Arc<DownloadProxy>,
    pub origins: Arc<OriginPolicy>,
    pub webhook_path: Option<Arc<str>>,
    pub protocol_versions: Arc<[u32]>,
}

impl AppState {
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        let store = create_cache_store(&cfg.redis).await;
        tracing::info!(mode = store.mode(), "Durable cache ready");

        let process = Arc::new(ProcessCache::new(cfg.cache.process_ttl()));
        tracing::info!(ttl_secs = process.ttl().as_secs(), "Process cache ready");
        let client = reqwest::Client::builder()
            .user_agent(&cfg.upstream.user_agent)
            .timeout(cfg.upstream.timeout())
            .build()?;
        let fetcher = UpstreamFetcher::new(client, Arc::clone(&store), cfg.cache.durable_ttl());
        let metadata = MetadataService::new(store, process, fetcher, cfg.upstream.clone())?;
        let downloads = DownloadProxy::new(&cfg.download, &cfg.upstream.user_agent)?;

        Ok(Self {
            metadata: Arc::new(metadata),
            downloads: Arc::new(downloads),
            origins: Arc::new(OriginPolicy::from_config(&cfg.origins)),
            webhook_path: cfg
                .webhook
                .secret_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(Arc::from),
            protocol_versions: Arc::from(cfg.upstream.protocol_versions.as_slice()),
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    // Binary downloads are already compressed archives.
    let compress_when =
        DefaultPredicate::new().and(NotForContentType::const_new("application/octet-stream"));

    // Layer order (outermost last): trace sees the request id.
    Router::new()
        .fallback(router::dispatch)
        .with_state(state)
        .layer(CompressionLayer::new().compress_when(compress_when))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    scheduler: Option<RefreshScheduler>,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> Result<GatewayServer, GatewayError> {
        let state = AppState::from_config(&self.config).await?;
        let scheduler = self.config.refresh.enabled.then(|| {
            RefreshScheduler::new(
                Arc::clone(&state.metadata),
                Duration::from_secs(self.config.refresh.interval_secs),
            )
        });

        Ok(GatewayServer {
            addr: self.addr,
            app: build_app(state),
            scheduler,
        })
    }
}

impl GatewayServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let scheduler_shutdown = self.scheduler.map(RefreshScheduler::start);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        if let Some(tx) = scheduler_shutdown {
            let _ = tx.send(true);
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
