use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env as std_env;
use validator::Validate;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

fn default_slot_capacity() -> i32 {
    12
}

fn default_currency() -> String {
    "PEN".to_string()
}

/// Application configuration, loaded from an optional `config/{env}.toml`
/// file and `APP__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret for validating bearer tokens issued by the auth service
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, test, production)
    #[serde(default)]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Card gateway API base URL
    pub gateway_base_url: String,

    /// Card gateway secret key (request authentication)
    pub gateway_secret_key: String,

    /// Shared secret for verifying inbound gateway webhooks
    pub gateway_webhook_secret: String,

    /// Outbound gateway call timeout (seconds). Calls are never retried
    /// by the client.
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Capacity assumed for a delivery slot with no row yet
    #[serde(default = "default_slot_capacity")]
    pub default_slot_capacity: i32,

    /// Settlement currency (ISO 4217)
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration from file + environment.
///
/// Precedence: defaults < `config/default.toml` < `config/{APP_ENV}.toml`
/// < `APP__*` environment variables.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let env = std_env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let cfg = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .set_default("environment", env.clone())?
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    Ok(app_config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("despensa_api={level},tower_http=info");
    let filter_directive = std_env::var("RUST_LOG")
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
