use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::resource::DEFAULT_PROTOCOL_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration for the durable cache tier
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache lifetimes for both tiers
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream metadata locations
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Download proxy settings
    #[serde(default)]
    pub download: DownloadConfig,
    /// Cross-origin caller tables
    #[serde(default)]
    pub origins: OriginsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Scheduled cache warming
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.cache.durable_ttl_secs == 0 || self.cache.process_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.process_ttl_secs > self.cache.durable_ttl_secs {
            return Err("cache.process_ttl_secs must be <= cache.durable_ttl_secs".into());
        }
        if self.upstream.timeout_ms == 0 {
            return Err("upstream.timeout_ms must be > 0".into());
        }
        if !self
            .upstream
            .protocol_versions
            .contains(&DEFAULT_PROTOCOL_VERSION)
        {
            return Err(format!(
                "upstream.protocol_versions must include the default version {DEFAULT_PROTOCOL_VERSION}"
            ));
        }
        for (name, value) in [
            ("upstream.releases_url", &self.upstream.releases_url),
            ("upstream.modules_url", &self.upstream.modules_url),
            ("upstream.presets_url", &self.upstream.presets_url),
            ("download.base_url", &self.download.base_url),
            ("download.latest_base_url", &self.download.latest_base_url),
        ] {
            url::Url::parse(value).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
        }
        for (name, template) in [
            ("upstream.tagged_modules_url", &self.upstream.tagged_modules_url),
            ("upstream.tagged_presets_url", &self.upstream.tagged_presets_url),
        ] {
            if !template.contains(REF_PLACEHOLDER) {
                return Err(format!("{name} must contain the {REF_PLACEHOLDER} placeholder"));
            }
        }
        if self.download.assets.is_empty() {
            return Err("download.assets must not be empty".into());
        }
        if let Some(asset) = self
            .download
            .assets
            .iter()
            .find(|a| a.is_empty() || a.contains('/') || a.contains(".."))
        {
            return Err(format!("download.assets contains an invalid file name: {asset:?}"));
        }
        if let Some(origin) = self
            .origins
            .secure
            .iter()
            .find(|o| !self.origins.allowed.contains(o))
        {
            return Err(format!(
                "origins.secure entry {origin} must also be listed in origins.allowed"
            ));
        }
        if let Some(path) = &self.webhook.secret_path
            && (path.is_empty() || path.contains('/'))
        {
            return Err("webhook.secret_path must be a single non-empty path segment".into());
        }
        if self.refresh.enabled && self.refresh.interval_secs == 0 {
            return Err("refresh.interval_secs must be > 0 when refresh is enabled".into());
        }
        if self.metrics.enabled {
            self.metrics
                .listen
                .parse::<SocketAddr>()
                .map_err(|e| format!("metrics.listen is not a socket address: {e}"))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis as the durable tier.
    /// When disabled (or unreachable) an in-memory store is used instead.
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of logical resources in the durable tier
    #[serde(default = "default_durable_ttl_secs")]
    pub durable_ttl_secs: u64,

    /// Freshness window of the in-process composite response
    #[serde(default = "default_process_ttl_secs")]
    pub process_ttl_secs: u64,
}

fn default_durable_ttl_secs() -> u64 {
    86_400 // 1 day
}

fn default_process_ttl_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn durable_ttl(&self) -> Duration {
        Duration::from_secs(self.durable_ttl_secs)
    }

    pub fn process_ttl(&self) -> Duration {
        Duration::from_secs(self.process_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            durable_ttl_secs: default_durable_ttl_secs(),
            process_ttl_secs: default_process_ttl_secs(),
        }
    }
}

/// Placeholder substituted with the requested git ref in tagged URL templates.
pub const REF_PLACEHOLDER: &str = "{ref}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// GitHub releases API listing (newest first)
    #[serde(default = "default_releases_url")]
    pub releases_url: String,
    /// Module list published with the latest release
    #[serde(default = "default_modules_url")]
    pub modules_url: String,
    /// Preset module list published with the latest release
    #[serde(default = "default_presets_url")]
    pub presets_url: String,
    /// Module list at an arbitrary ref; `{ref}` is replaced with the tag
    #[serde(default = "default_tagged_modules_url")]
    pub tagged_modules_url: String,
    /// Preset module list at an arbitrary ref; `{ref}` is replaced with the tag
    #[serde(default = "default_tagged_presets_url")]
    pub tagged_presets_url: String,
    /// Optional GitHub token used for the releases API
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Total timeout for a single metadata request
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    /// Protocol versions clients may request; anything else falls back to the default
    #[serde(default = "default_protocol_versions")]
    pub protocol_versions: Vec<u32>,
}

fn default_releases_url() -> String {
    "https://api.github.com/repos/mastercomfig/mastercomfig/releases".into()
}
fn default_modules_url() -> String {
    "https://github.com/mastercomfig/mastercomfig/releases/latest/download/modules.json".into()
}
fn default_presets_url() -> String {
    "https://github.com/mastercomfig/mastercomfig/releases/latest/download/preset_modules.json"
        .into()
}
fn default_tagged_modules_url() -> String {
    "https://raw.githubusercontent.com/mastercomfig/mastercomfig/{ref}/data/modules.json".into()
}
fn default_tagged_presets_url() -> String {
    "https://raw.githubusercontent.com/mastercomfig/mastercomfig/{ref}/data/preset_modules.json"
        .into()
}
fn default_user_agent() -> String {
    concat!("comfig-gateway/", env!("CARGO_PKG_VERSION")).into()
}
fn default_upstream_timeout_ms() -> u64 {
    10_000
}
fn default_protocol_versions() -> Vec<u32> {
    vec![1, DEFAULT_PROTOCOL_VERSION]
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            releases_url: default_releases_url(),
            modules_url: default_modules_url(),
            presets_url: default_presets_url(),
            tagged_modules_url: default_tagged_modules_url(),
            tagged_presets_url: default_tagged_presets_url(),
            github_token: None,
            user_agent: default_user_agent(),
            timeout_ms: default_upstream_timeout_ms(),
            protocol_versions: default_protocol_versions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base for `/download/<rest>`, joined as `<base_url>/<rest>`
    #[serde(default = "default_download_base_url")]
    pub base_url: String,
    /// Base for `/latest/download/<asset>`
    #[serde(default = "default_latest_base_url")]
    pub latest_base_url: String,
    /// Binary file names the proxy will serve
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    /// `max-age` for successful latest/dev downloads
    #[serde(default = "default_unversioned_max_age")]
    pub unversioned_max_age_secs: u64,
    /// `max-age` for failed downloads of either kind
    #[serde(default = "default_failure_max_age")]
    pub failure_max_age_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_download_base_url() -> String {
    "https://github.com/mastercomfig/mastercomfig/releases/download".into()
}
fn default_latest_base_url() -> String {
    "https://github.com/mastercomfig/mastercomfig/releases/latest/download".into()
}
fn default_assets() -> Vec<String> {
    [
        "mastercomfig-base.vpk",
        "mastercomfig-ultra-preset.vpk",
        "mastercomfig-high-preset.vpk",
        "mastercomfig-medium-high-preset.vpk",
        "mastercomfig-medium-preset.vpk",
        "mastercomfig-medium-low-preset.vpk",
        "mastercomfig-low-preset.vpk",
        "mastercomfig-very-low-preset.vpk",
        "mastercomfig-none-preset.vpk",
        "mastercomfig-flat-mouse-addon.vpk",
        "mastercomfig-no-footsteps-addon.vpk",
        "mastercomfig-disable-pyroland-addon.vpk",
        "mastercomfig-no-tutorial-addon.vpk",
        "mastercomfig-no-soundscapes-addon.vpk",
        "mastercomfig-transparent-viewmodels-addon.vpk",
        "mastercomfig-lowmem-addon.vpk",
        "mastercomfig-null-canceling-movement-addon.vpk",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_unversioned_max_age() -> u64 {
    3600
}
fn default_failure_max_age() -> u64 {
    60
}
fn default_connect_timeout_ms() -> u64 {
    5000
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            base_url: default_download_base_url(),
            latest_base_url: default_latest_base_url(),
            assets: default_assets(),
            unversioned_max_age_secs: default_unversioned_max_age(),
            failure_max_age_secs: default_failure_max_age(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginsConfig {
    /// Origins that receive CORS headers
    #[serde(default = "default_allowed_origins")]
    pub allowed: Vec<String>,
    /// Subset of `allowed` that additionally receives a same-origin resource policy
    #[serde(default = "default_secure_origins")]
    pub secure: Vec<String>,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://mastercomfig.com".into(),
        "https://www.mastercomfig.com".into(),
        "https://comfig.app".into(),
        "https://www.comfig.app".into(),
        "http://localhost:4321".into(),
        "http://127.0.0.1:4321".into(),
    ]
}
fn default_secure_origins() -> Vec<String> {
    vec!["https://comfig.app".into(), "https://www.comfig.app".into()]
}

impl Default for OriginsConfig {
    fn default() -> Self {
        Self {
            allowed: default_allowed_origins(),
            secure: default_secure_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// Single path segment acting as the bearer secret for forced refreshes.
    /// Prefer COMFIG__WEBHOOK__SECRET_PATH over putting it in a file.
    #[serde(default)]
    pub secret_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_enabled")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
}

fn default_refresh_enabled() -> bool {
    true
}
fn default_refresh_interval_secs() -> u64 {
    1800
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_refresh_enabled(),
            interval_secs: default_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address the Prometheus exporter listens on
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9090".into()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("comfig.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., COMFIG__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("COMFIG")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("origins.allowed")
                .with_list_parse_key("origins.secure")
                .with_list_parse_key("download.assets")
                .with_list_parse_key("upstream.protocol_versions"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
