use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_REPOSITORY_BACKEND: &str = "in-memory";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_REDIS_NAMESPACE: &str = "tabletap";
const DEFAULT_CART_SNAPSHOT_PATH: &str = "data/carts.json";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_POLL_CEILING_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_SWEEP_CUTOFF_SECS: u64 = 600;

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server bind host.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, production, ...). Selects the
    /// `config/{env}.toml` overlay.
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging).
    #[serde(default)]
    pub log_json: bool,

    /// Gateway server key. No default: must come from the environment or a
    /// config file, never from source.
    #[validate(length(min = 1))]
    pub midtrans_server_key: String,

    /// Gateway client key, exposed to the checkout page.
    #[serde(default)]
    pub midtrans_client_key: String,

    /// Use the production gateway endpoints instead of the sandbox.
    #[serde(default)]
    pub midtrans_production: bool,

    /// Order store backend: "in-memory" or "redis".
    #[serde(default = "default_repository_backend")]
    #[validate(custom = "validate_repository_backend")]
    pub repository_backend: String,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for the Redis backend.
    #[serde(default = "default_redis_namespace")]
    pub redis_namespace: String,

    /// Where cart snapshots are written between restarts.
    #[serde(default = "default_cart_snapshot_path")]
    pub cart_snapshot_path: String,

    /// Optional JSON menu file backing the cart's price fallback.
    #[serde(default)]
    pub menu_path: Option<String>,

    /// Seconds between gateway polls for a pending payment.
    #[serde(default = "default_poll_interval_secs")]
    pub payment_poll_interval_secs: u64,

    /// Seconds after which a payment watcher gives up.
    #[serde(default = "default_poll_ceiling_secs")]
    pub payment_poll_ceiling_secs: u64,

    /// Seconds between orphan sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub orphan_sweep_interval_secs: u64,

    /// Age in seconds past which an awaiting_gateway order counts as
    /// orphaned.
    #[serde(default = "default_sweep_cutoff_secs")]
    pub orphan_sweep_cutoff_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_repository_backend() -> String {
    DEFAULT_REPOSITORY_BACKEND.to_string()
}
fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}
fn default_redis_namespace() -> String {
    DEFAULT_REDIS_NAMESPACE.to_string()
}
fn default_cart_snapshot_path() -> String {
    DEFAULT_CART_SNAPSHOT_PATH.to_string()
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_poll_ceiling_secs() -> u64 {
    DEFAULT_POLL_CEILING_SECS
}
fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}
fn default_sweep_cutoff_secs() -> u64 {
    DEFAULT_SWEEP_CUTOFF_SECS
}

fn validate_repository_backend(backend: &str) -> Result<(), ValidationError> {
    match backend {
        "in-memory" | "redis" => Ok(()),
        _ => Err(ValidationError::new("unknown repository backend")),
    }
}

impl AppConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, AppConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|_| {
            AppConfigError::Load(ConfigError::Message(format!(
                "invalid host address: {}",
                self.host
            )))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.payment_poll_interval_secs)
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.payment_poll_ceiling_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs)
    }

    pub fn sweep_cutoff(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_cutoff_secs)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Checked before deserialization for a clearer error message.
    if config.get_string("midtrans_server_key").is_err() {
        error!("Gateway server key is not configured. Set APP__MIDTRANS_SERVER_KEY or add midtrans_server_key to a config file.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "midtrans_server_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("tabletap_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "test".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            midtrans_server_key: "sk-test".to_string(),
            midtrans_client_key: String::new(),
            midtrans_production: false,
            repository_backend: DEFAULT_REPOSITORY_BACKEND.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_namespace: DEFAULT_REDIS_NAMESPACE.to_string(),
            cart_snapshot_path: DEFAULT_CART_SNAPSHOT_PATH.to_string(),
            menu_path: None,
            payment_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            payment_poll_ceiling_secs: DEFAULT_POLL_CEILING_SECS,
            orphan_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            orphan_sweep_cutoff_secs: DEFAULT_SWEEP_CUTOFF_SECS,
        }
    }

    #[test]
    fn base_config_is_valid() {
        assert!(base_config().validate().is_ok());
        assert_eq!(
            base_config().socket_addr().unwrap().to_string(),
            "127.0.0.1:8080"
        );
    }

    #[test]
    fn empty_server_key_is_rejected() {
        let mut cfg = base_config();
        cfg.midtrans_server_key = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut cfg = base_config();
        cfg.repository_backend = "postgres".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn poll_durations_map_from_seconds() {
        let cfg = base_config();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(5));
        assert_eq!(cfg.poll_ceiling(), Duration::from_secs(300));
    }
}
