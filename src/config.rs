use std::env;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
}

/// Application configuration, layered from built-in defaults, `config/*.toml`
/// profiles, and `APP__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to validate bearer tokens issued by the auth service
    pub jwt_secret: String,

    /// Bind host and port
    pub host: String,
    pub port: u16,

    pub environment: String,
    pub log_level: String,
    pub log_json: bool,

    /// Database pool sizing
    pub db_max_connections: u32,
    pub db_min_connections: u32,

    /// Payment gateway credentials
    pub gateway_secret_key: String,
    /// Webhook signing secret; webhook verification is skipped when empty
    pub gateway_webhook_secret: String,
    /// Allowed clock skew for webhook signatures, in seconds
    pub gateway_webhook_tolerance_secs: u64,

    /// Commerce constants. The cart and order rates deliberately differ;
    /// see DESIGN.md before "fixing" this.
    pub cart_tax_rate: Decimal,
    pub order_tax_rate: Decimal,
    pub default_shipping_fee: Decimal,
    pub default_currency: String,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Minimal constructor used by tests
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: "test_secret_key_for_testing_purposes_only_32chars".into(),
            host: "127.0.0.1".into(),
            port: 18_080,
            environment: "test".into(),
            log_level: DEFAULT_LOG_LEVEL.into(),
            log_json: false,
            db_max_connections: 1,
            db_min_connections: 1,
            gateway_secret_key: "sk_test_000".into(),
            gateway_webhook_secret: "whsec_test".into(),
            gateway_webhook_tolerance_secs: 300,
            cart_tax_rate: Decimal::new(3, 2),
            order_tax_rate: Decimal::new(18, 2),
            default_shipping_fee: Decimal::from(10),
            default_currency: "USD".into(),
        }
    }
}

/// Loads configuration for the current `RUN_ENV`/`APP_ENV` profile.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://telepharm.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("db_max_connections", 10)?
        .set_default("db_min_connections", 1)?
        .set_default("gateway_webhook_secret", "")?
        .set_default("gateway_webhook_tolerance_secs", 300)?
        .set_default("cart_tax_rate", "0.03")?
        .set_default("order_tax_rate", "0.18")?
        .set_default("default_shipping_fee", "10.00")?
        .set_default("default_currency", "USD")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Secrets have no defaults; fail loudly with actionable guidance.
    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }
    if config.get_string("gateway_secret_key").is_err() {
        error!("Payment gateway key is not configured. Set APP__GATEWAY_SECRET_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "gateway_secret_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;
    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("telepharm_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive).unwrap_or_else(|_| EnvFilter::new("info"));

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
