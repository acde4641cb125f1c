//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true` (in-memory stores)
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub storage: StorageConfig,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment engine settings
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub default_provider: String,
    /// Preferred provider per currency code, e.g. `NGN=paystack`
    pub currency_providers: HashMap<String, String>,
    /// Amounts strictly above this are routed to manual bank transfer
    pub manual_above_amount: Option<BigDecimal>,
    pub manual_payments_enabled: bool,
    pub callback_url: Option<String>,
    pub gateway_timeout_secs: u64,
    pub manual_payment_deadline_hours: i64,
    pub max_proof_uploads: u32,
    pub signed_url_ttl_secs: u64,
    pub escrow_hold_days: i64,
    pub payout_max_attempts: u32,
    pub payout_retry_base_secs: u64,
    pub payout_retry_max_secs: u64,
    pub fee_config_cache_ttl_secs: u64,
}

/// Payment proof storage
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub root_dir: String,
    pub public_base_url: String,
    pub signing_secret: String,
}

/// Background worker schedule
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub payout_release_interval_secs: u64,
    pub payout_batch_size: i64,
    pub monitor_interval_secs: u64,
    pub stale_pending_after_mins: i64,
    pub monitor_batch_size: i64,
}

pub fn skip_externals() -> bool {
    env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true"
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals() {
                None
            } else {
                Some(DatabaseConfig::from_env()?)
            },
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.payments.validate()?;
        self.storage.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_provider: "paystack".to_string(),
            currency_providers: HashMap::new(),
            manual_above_amount: None,
            manual_payments_enabled: true,
            callback_url: None,
            gateway_timeout_secs: 15,
            manual_payment_deadline_hours: 48,
            max_proof_uploads: 3,
            signed_url_ttl_secs: 3600,
            escrow_hold_days: 7,
            payout_max_attempts: 5,
            payout_retry_base_secs: 60,
            payout_retry_max_secs: 3600,
            fee_config_cache_ttl_secs: 300,
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let currency_providers = parse_currency_providers(
            &env::var("PAYMENT_CURRENCY_PROVIDERS").unwrap_or_default(),
        )?;

        let manual_above_amount = match env::var("PAYMENT_MANUAL_ABOVE_AMOUNT") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                BigDecimal::from_str(raw.trim()).map_err(|_| {
                    ConfigError::InvalidValue("PAYMENT_MANUAL_ABOVE_AMOUNT".to_string())
                })?,
            ),
            _ => None,
        };

        Ok(PaymentsConfig {
            default_provider: env::var("DEFAULT_PAYMENT_PROVIDER")
                .unwrap_or(defaults.default_provider)
                .to_lowercase(),
            currency_providers,
            manual_above_amount,
            manual_payments_enabled: parse_var("MANUAL_PAYMENTS_ENABLED", "true")?,
            callback_url: env::var("PAYMENT_CALLBACK_URL").ok(),
            gateway_timeout_secs: parse_var("PAYMENT_GATEWAY_TIMEOUT_SECS", "15")?,
            manual_payment_deadline_hours: parse_var("MANUAL_PAYMENT_DEADLINE_HOURS", "48")?,
            max_proof_uploads: parse_var("MAX_PROOF_UPLOADS", "3")?,
            signed_url_ttl_secs: parse_var("PROOF_SIGNED_URL_TTL_SECS", "3600")?,
            escrow_hold_days: parse_var("ESCROW_HOLD_DAYS", "7")?,
            payout_max_attempts: parse_var("PAYOUT_MAX_ATTEMPTS", "5")?,
            payout_retry_base_secs: parse_var("PAYOUT_RETRY_BASE_SECS", "60")?,
            payout_retry_max_secs: parse_var("PAYOUT_RETRY_MAX_SECS", "3600")?,
            fee_config_cache_ttl_secs: parse_var("FEE_CONFIG_CACHE_TTL_SECS", "300")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_provider.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_PAYMENT_PROVIDER".to_string(),
            ));
        }
        if self.gateway_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_GATEWAY_TIMEOUT_SECS".to_string(),
            ));
        }
        if self.max_proof_uploads == 0 {
            return Err(ConfigError::InvalidValue("MAX_PROOF_UPLOADS".to_string()));
        }
        if self.payout_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PAYOUT_MAX_ATTEMPTS".to_string()));
        }
        if self.payout_retry_base_secs > self.payout_retry_max_secs {
            return Err(ConfigError::ValidationFailed(
                "PAYOUT_RETRY_BASE_SECS must be <= PAYOUT_RETRY_MAX_SECS".to_string(),
            ));
        }
        if self.escrow_hold_days < 0 || self.manual_payment_deadline_hours <= 0 {
            return Err(ConfigError::ValidationFailed(
                "escrow hold and manual deadline must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }
}

/// Parse `NGN=paystack,MYR=billplz` into a currency -> provider map.
pub fn parse_currency_providers(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut map = HashMap::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (currency, provider) = part
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidValue("PAYMENT_CURRENCY_PROVIDERS".to_string()))?;
        if currency.trim().is_empty() || provider.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_CURRENCY_PROVIDERS".to_string(),
            ));
        }
        map.insert(
            currency.trim().to_uppercase(),
            provider.trim().to_lowercase(),
        );
    }
    Ok(map)
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(StorageConfig {
            root_dir: env::var("PROOF_STORAGE_DIR")
                .unwrap_or_else(|_| "./uploads/payment-proofs".to_string()),
            public_base_url: env::var("PROOF_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000/files/payment-proofs".to_string()),
            signing_secret: env::var("PROOF_SIGNING_SECRET")
                .map_err(|_| ConfigError::MissingVariable("PROOF_SIGNING_SECRET".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "PROOF_SIGNING_SECRET must be at least 16 characters".to_string(),
            ));
        }
        if !self.public_base_url.starts_with("http://")
            && !self.public_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "PROOF_PUBLIC_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WorkerConfig {
            payout_release_interval_secs: parse_var("PAYOUT_RELEASE_INTERVAL_SECS", "60")?,
            payout_batch_size: parse_var("PAYOUT_RELEASE_BATCH_SIZE", "50")?,
            monitor_interval_secs: parse_var("PAYMENT_MONITOR_INTERVAL_SECS", "120")?,
            stale_pending_after_mins: parse_var("PAYMENT_MONITOR_STALE_AFTER_MINS", "30")?,
            monitor_batch_size: parse_var("PAYMENT_MONITOR_BATCH_SIZE", "100")?,
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            payout_release_interval_secs: 60,
            payout_batch_size: 50,
            monitor_interval_secs: 120,
            stale_pending_after_mins: 30,
            monitor_batch_size: 100,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}
