//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::notifications::MailtrapConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Unset means the in-process wake queue.
    pub redis_url: Option<String>,
    pub concurrency: usize,
    pub wake_timeout: Duration,
    pub idle_sleep: Duration,
    pub error_backoff: Duration,
    pub storage_root: PathBuf,
    pub input_bucket: String,
    pub output_bucket: String,
    pub scratch_root: PathBuf,
    pub notify_timeout: Duration,
    /// Present only when `MAILTRAP_API_KEY` is set.
    pub mailtrap: Option<MailtrapConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            redis_url: None,
            concurrency: 4,
            wake_timeout: Duration::from_secs(5),
            idle_sleep: Duration::from_millis(1000),
            error_backoff: Duration::from_millis(2000),
            storage_root: PathBuf::from("./data/storage"),
            input_bucket: "uploads".to_string(),
            output_bucket: "results".to_string(),
            scratch_root: std::env::temp_dir().join("jobforge"),
            notify_timeout: Duration::from_secs(10),
            mailtrap: None,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let concurrency: usize = parse_or(&get, "WORKER_CONCURRENCY", defaults.concurrency)?;
        if concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0"));
        }
        let wake_timeout_secs: u64 = parse_or(
            &get,
            "WAKE_TIMEOUT_SECS",
            defaults.wake_timeout.as_secs(),
        )?;
        if wake_timeout_secs == 0 {
            return Err(invalid("WAKE_TIMEOUT_SECS", "0"));
        }

        let mailtrap = match get("MAILTRAP_API_KEY") {
            None => None,
            Some(api_key) => Some(MailtrapConfig {
                api_key,
                sender_email: get("MAILTRAP_SENDER_EMAIL")
                    .ok_or(ConfigError::Missing("MAILTRAP_SENDER_EMAIL"))?,
                sender_name: get("MAILTRAP_SENDER_NAME").unwrap_or_else(|| "JobForge".to_string()),
                use_sandbox: match get("MAILTRAP_USE_SANDBOX") {
                    None => false,
                    Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                        var: "MAILTRAP_USE_SANDBOX",
                        value: raw,
                    })?,
                },
                inbox_id: get("MAILTRAP_INBOX_ID")
                    .map(|raw| raw.trim().parse().map_err(|_| invalid("MAILTRAP_INBOX_ID", &raw)))
                    .transpose()?,
            }),
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            redis_url: get("REDIS_URL"),
            concurrency,
            wake_timeout: Duration::from_secs(wake_timeout_secs),
            idle_sleep: Duration::from_millis(parse_or(&get, "IDLE_SLEEP_MS", 1000u64)?),
            error_backoff: Duration::from_millis(parse_or(&get, "ERROR_BACKOFF_MS", 2000u64)?),
            storage_root: get("STORAGE_ROOT").map_or(defaults.storage_root, PathBuf::from),
            input_bucket: get("INPUT_BUCKET").unwrap_or(defaults.input_bucket),
            output_bucket: get("OUTPUT_BUCKET").unwrap_or(defaults.output_bucket),
            scratch_root: get("SCRATCH_ROOT").map_or(defaults.scratch_root, PathBuf::from),
            notify_timeout: Duration::from_secs(parse_or(
                &get,
                "NOTIFY_TIMEOUT_SECS",
                defaults.notify_timeout.as_secs(),
            )?),
            mailtrap,
        })
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn invalid(var: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(var, &raw)),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
