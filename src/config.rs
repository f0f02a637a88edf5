//! Environment-driven configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ConfigError, Network};

pub const DEFAULT_WALLET_SERVICE_URL: &str = "https://bws.bitpay.com/bws/api";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'json' or 'pretty', got '{other}'")),
        }
    }
}

/// Remote wallet parameters.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub service_url: String,
    pub network: Network,
    pub required_signers: u8,
    pub total_signers: u8,
    pub default_currency: String,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub count: usize,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub stale_after: Duration,
    pub max_reclaims: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub wallet: WalletConfig,
    pub workers: WorkerSettings,
    pub notification_webhook_url: Option<String>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns the raw value of a key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".into()))?;

        let wallet = WalletConfig {
            service_url: get("WALLET_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_WALLET_SERVICE_URL.to_string()),
            network: parse_or(&get, "WALLET_NETWORK", Network::Testnet)?,
            required_signers: parse_or(&get, "WALLET_REQUIRED_SIGNERS", 1)?,
            total_signers: parse_or(&get, "WALLET_TOTAL_SIGNERS", 1)?,
            default_currency: get("WALLET_DEFAULT_CURRENCY").unwrap_or_else(|| "btc".to_string()),
        };
        if wallet.total_signers == 0 {
            return Err(invalid("WALLET_TOTAL_SIGNERS", "must be at least 1"));
        }
        if wallet.required_signers == 0 || wallet.required_signers > wallet.total_signers {
            return Err(invalid(
                "WALLET_REQUIRED_SIGNERS",
                format!("must be between 1 and {}", wallet.total_signers),
            ));
        }

        let workers = WorkerSettings {
            count: parse_or(&get, "WORKER_COUNT", 2)?,
            poll_interval: Duration::from_millis(parse_or(&get, "WORKER_POLL_INTERVAL_MS", 1000)?),
            batch_size: parse_or(&get, "WORKER_BATCH_SIZE", 10)?,
            stale_after: Duration::from_secs(parse_or(&get, "JOB_STALE_AFTER_SECS", 300)?),
            max_reclaims: parse_or(&get, "JOB_MAX_RECLAIMS", 3)?,
        };
        if workers.batch_size == 0 {
            return Err(invalid("WORKER_BATCH_SIZE", "must be at least 1"));
        }

        Ok(Self {
            database_url,
            bind_addr: parse_or(
                &get,
                "BIND_ADDR",
                SocketAddr::from(([0, 0, 0, 0], 3000)),
            )?,
            wallet,
            workers,
            notification_webhook_url: get("NOTIFICATION_WEBHOOK_URL"),
            log_format: parse_or(&get, "LOG_FORMAT", LogFormat::default())?,
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}
