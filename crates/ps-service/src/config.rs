//! Presence service configuration.
//!
//! Configuration is loaded from environment variables. Connection URLs may
//! carry credentials and are redacted in Debug output.

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the WebSocket gateway and stats endpoints.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default debounce window between "room observed empty" and "event ended".
pub const DEFAULT_DEBOUNCE_WINDOW_SECONDS: u64 = 30;

/// Default period of the time-sync broadcaster.
pub const DEFAULT_TIME_SYNC_INTERVAL_SECONDS: u64 = 5;

/// Default number of completed notification jobs the broker retains.
pub const DEFAULT_JOB_KEEP_COMPLETED: u32 = 10;

/// Default number of failed notification jobs the broker retains.
pub const DEFAULT_JOB_KEEP_FAILED: u32 = 5;

/// Default Redis key prefix of the notification queue.
pub const DEFAULT_QUEUE_NAME: &str = "event-notifications";

/// Default path prefix for in-app notification links.
pub const DEFAULT_NOTIFICATION_LINK_BASE: &str = "/events";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "ps";

/// Presence service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (job broker).
    pub redis_url: SecretString,

    /// Postgres connection URL (event, host and notification records).
    pub database_url: SecretString,

    /// WebSocket gateway + stats bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health/metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance (logs only).
    pub instance_id: String,

    /// Debounce window in seconds (default: 30). Also the job delay.
    pub debounce_window_seconds: u64,

    /// Broadcaster period in seconds (default: 5).
    pub time_sync_interval_seconds: u64,

    /// Completed jobs retained by the broker (default: 10).
    pub job_keep_completed: u32,

    /// Failed jobs retained by the broker (default: 5).
    pub job_keep_failed: u32,

    /// Redis key prefix for the notification queue.
    pub queue_name: String,

    /// Path prefix for in-app notification links.
    pub notification_link_base: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("debounce_window_seconds", &self.debounce_window_seconds)
            .field(
                "time_sync_interval_seconds",
                &self.time_sync_interval_seconds,
            )
            .field("job_keep_completed", &self.job_keep_completed)
            .field("job_keep_failed", &self.job_keep_failed)
            .field("queue_name", &self.queue_name)
            .field("notification_link_base", &self.notification_link_base)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let database_url = SecretString::from(
            vars.get("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("PS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("PS_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        // Zero or malformed timing values fail startup
        let debounce_window_seconds = parse_seconds(
            vars,
            "PS_DEBOUNCE_WINDOW_SECONDS",
            DEFAULT_DEBOUNCE_WINDOW_SECONDS,
        )?;

        let time_sync_interval_seconds = parse_seconds(
            vars,
            "PS_TIME_SYNC_INTERVAL_SECONDS",
            DEFAULT_TIME_SYNC_INTERVAL_SECONDS,
        )?;

        let job_keep_completed =
            parse_count(vars, "PS_JOB_KEEP_COMPLETED", DEFAULT_JOB_KEEP_COMPLETED)?;

        let job_keep_failed = parse_count(vars, "PS_JOB_KEEP_FAILED", DEFAULT_JOB_KEEP_FAILED)?;

        let queue_name = vars
            .get("PS_QUEUE_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());

        let notification_link_base = vars
            .get("PS_NOTIFICATION_LINK_BASE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_NOTIFICATION_LINK_BASE.to_string());

        let instance_id = vars.get("PS_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            database_url,
            bind_address,
            health_bind_address,
            instance_id,
            debounce_window_seconds,
            time_sync_interval_seconds,
            job_keep_completed,
            job_keep_failed,
            queue_name,
            notification_link_base,
        })
    }

    /// Debounce window as a `Duration`.
    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_window_seconds)
    }

    /// Broadcaster period as a `Duration`.
    #[must_use]
    pub fn time_sync_interval(&self) -> Duration {
        Duration::from_secs(self.time_sync_interval_seconds)
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    match raw.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{name} must be > 0"))),
        Ok(value) => Ok(value),
        Err(_) => Err(ConfigError::InvalidValue(format!(
            "{name} must be a whole number of seconds, got {raw:?}"
        ))),
    }
}

/// Zero is a valid retention count.
fn parse_count(
    vars: &HashMap<String, String>,
    name: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    raw.parse::<u32>().map_err(|_| {
        ConfigError::InvalidValue(format!(
            "{name} must be a non-negative whole number, got {raw:?}"
        ))
    })
}
