pub mod assemble;
pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod origin;
pub mod resource;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod upstream;
pub mod webhook;

pub use cache::{CacheError, CacheStore, MemoryCacheStore, ProcessCache, RedisCacheStore};
pub use config::{AppConfig, CacheConfig, DownloadConfig, RedisConfig, UpstreamConfig};
pub use error::GatewayError;
pub use metadata::MetadataService;
pub use observability::init_tracing;
pub use server::{AppState, GatewayServer, ServerBuilder, build_app};
