//! Configuration module for the Secret Santa backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Brevo delivery provider settings. Only present when an API key is configured.
#[derive(Debug, Clone)]
pub struct BrevoConfig {
    pub api_key: String,
    pub sms_url: String,
    pub email_url: String,
    pub sms_sender: String,
    pub email_from_name: String,
    pub email_from_address: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// SMS/email provider; `None` leaves delivery unconfigured
    pub brevo: Option<BrevoConfig>,
    /// Upper bound on a single delivery call
    pub delivery_timeout: Duration,
}

/// Invalid configuration value.
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("SANTA_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("SANTA_DB_PATH")
            .unwrap_or_else(|_| "./data/santa.sqlite".to_string())
            .into();

        let bind_addr = env::var("SANTA_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError {
                variable: "SANTA_BIND_ADDR",
                message: e.to_string(),
            })?;

        let log_level = env::var("SANTA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let delivery_timeout_secs: u64 = env::var("SANTA_DELIVERY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError {
                variable: "SANTA_DELIVERY_TIMEOUT_SECS",
                message: e.to_string(),
            })?;

        let brevo = env::var("BREVO_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(|api_key| BrevoConfig {
                api_key,
                sms_url: env::var("BREVO_SMS_URL").unwrap_or_else(|_| {
                    "https://api.brevo.com/v3/transactionalSMS/sms".to_string()
                }),
                email_url: env::var("BREVO_EMAIL_URL")
                    .unwrap_or_else(|_| "https://api.brevo.com/v3/smtp/email".to_string()),
                sms_sender: env::var("SMS_SENDER_NAME")
                    .unwrap_or_else(|_| "SecretSanta".to_string()),
                email_from_name: env::var("EMAIL_FROM_NAME")
                    .unwrap_or_else(|_| "Secret Santa App".to_string()),
                email_from_address: env::var("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "secretsanta@example.com".to_string()),
            });

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            brevo,
            delivery_timeout: Duration::from_secs(delivery_timeout_secs),
        })
    }
}
