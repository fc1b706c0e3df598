// =============================================================================
// Runtime Configuration — Hot-reloadable core settings with atomic save
// =============================================================================
//
// Every tunable parameter lives here so the process can be reconfigured
// without a restart. All fields carry `#[serde(default)]` so that adding new
// fields never breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_enrichment_concurrency() -> usize {
    10
}

fn default_enrichment_timeout_secs() -> u64 {
    30
}

fn default_crypto_top_by_volume() -> usize {
    100
}

fn default_crash_threshold() -> f64 {
    -0.30
}

fn default_market_panic_threshold() -> f64 {
    -0.10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_admin_token_env() -> String {
    "SCREENER_ADMIN_TOKEN".to_string()
}

/// Top-level runtime configuration for the data-acquisition core.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrency cap for the RSI-enrichment fan-out across all pipelines.
    #[serde(default = "default_enrichment_concurrency")]
    pub enrichment_concurrency: usize,

    /// Global timeout, in seconds, for one enrichment pass.
    #[serde(default = "default_enrichment_timeout_secs")]
    pub enrichment_timeout_secs: u64,

    /// Crypto universe restriction: top-N markets by 24h trade volume.
    #[serde(default = "default_crypto_top_by_volume")]
    pub crypto_top_by_volume: usize,

    /// Crash-filter threshold (decimal, e.g. -0.30 for -30%).
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: f64,

    /// BTC panic threshold above which the crash filter is active (decimal).
    #[serde(default = "default_market_panic_threshold")]
    pub market_panic_threshold: f64,

    /// Shared cache remote tier connection string.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Broker REST app key, read from the environment at startup time
    /// (never persisted to the config file).
    #[serde(skip, default)]
    pub broker_app_key: String,

    /// Broker REST app secret, same handling as `broker_app_key`.
    #[serde(skip, default)]
    pub broker_app_secret: String,

    /// Name of the environment variable holding the admin bearer token.
    #[serde(default = "default_admin_token_env")]
    pub admin_token_env: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enrichment_concurrency: default_enrichment_concurrency(),
            enrichment_timeout_secs: default_enrichment_timeout_secs(),
            crypto_top_by_volume: default_crypto_top_by_volume(),
            crash_threshold: default_crash_threshold(),
            market_panic_threshold: default_market_panic_threshold(),
            redis_url: default_redis_url(),
            broker_app_key: String::new(),
            broker_app_secret: String::new(),
            admin_token_env: default_admin_token_env(),
        }
    }
}

impl RuntimeConfig {
    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }

    /// Load configuration from a JSON file at `path`, then overlay the
    /// broker credentials from the environment (these never round-trip
    /// through the file).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config.broker_app_key = std::env::var("BROKER_APP_KEY").unwrap_or_default();
        config.broker_app_secret = std::env::var("BROKER_APP_SECRET").unwrap_or_default();

        info!(
            path = %path.display(),
            enrichment_concurrency = config.enrichment_concurrency,
            redis_url = %config.redis_url,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename). Broker credentials are never written
    /// since they carry `#[serde(skip)]`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.enrichment_concurrency, 10);
        assert_eq!(cfg.crypto_top_by_volume, 100);
        assert_eq!(cfg.crash_threshold, -0.30);
        assert_eq!(cfg.market_panic_threshold, -0.10);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.enrichment_concurrency, 10);
        assert_eq!(cfg.admin_token_env, "SCREENER_ADMIN_TOKEN");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "enrichment_concurrency": 20 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.enrichment_concurrency, 20);
        assert_eq!(cfg.crypto_top_by_volume, 100);
    }

    #[test]
    fn roundtrip_serialisation_skips_credentials() {
        let mut cfg = RuntimeConfig::default();
        cfg.broker_app_key = "secret".to_string();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg2.broker_app_key, "");
        assert_eq!(cfg.enrichment_concurrency, cfg2.enrichment_concurrency);
    }

    #[test]
    fn enrichment_timeout_converts_seconds_to_duration() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.enrichment_timeout(), Duration::from_secs(30));
    }
}
