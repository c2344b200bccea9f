//! Log filter setup for the gateway.
//!
//! Every request fans out to upstream HTTP calls, so the client stack
//! (hyper, reqwest, h2, rustls) is held at `warn` regardless of the
//! configured gateway level. `RUST_LOG` replaces the whole filter.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const CLIENT_STACK: [&str; 4] = ["hyper", "reqwest", "h2", "rustls"];

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Gateway filter for `level` with the upstream client crates quietened.
pub fn gateway_filter(level: &str) -> EnvFilter {
    let directives = CLIENT_STACK
        .iter()
        .fold(level.to_string(), |acc, target| format!("{acc},{target}=warn"));
    EnvFilter::new(directives)
}

fn env_override() -> Option<EnvFilter> {
    std::env::var_os("RUST_LOG")?;
    EnvFilter::try_from_default_env().ok()
}

/// Install the subscriber at `info` until configuration is loaded.
pub fn init_tracing() {
    let filter = env_override().unwrap_or_else(|| gateway_filter("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Swap in the configured level. A no-op when `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = FILTER_HANDLE.get() else {
        return;
    };
    if let Err(e) = handle.reload(gateway_filter(level)) {
        tracing::warn!(error = %e, level, "Failed to apply logging level");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_stack_is_quietened() {
        let filter = gateway_filter("debug").to_string();
        assert!(filter.contains("debug"));
        for target in CLIENT_STACK {
            assert!(filter.contains(&format!("{target}=warn")), "{filter}");
        }
    }

    #[test]
    fn level_may_carry_its_own_directives() {
        let filter = gateway_filter("info,comfig_gateway::upstream=trace").to_string();
        assert!(filter.contains("comfig_gateway::upstream=trace"));
        assert!(filter.contains("reqwest=warn"));
    }
}
