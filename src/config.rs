use crate::models::lease_expiry;
use chrono::Utc;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOCK_NAME: &str = "cron_leader";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage_type: StorageType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    pub election: ElectionConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Redis,
    Postgres,
}

/// 选举配置
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ElectionConfig {
    pub lock_name: String,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub acquisition_retry_interval: Duration,
    /// 单次存储往返的超时上限
    pub operation_timeout: Duration,
    pub startup_attempts: u32,
    pub startup_backoff: Duration,
    /// `stop()` 释放租约的超时上限
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("lock name cannot be empty")]
    EmptyLockName,

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("heartbeat interval ({heartbeat:?}) must be shorter than lease duration ({lease:?})")]
    HeartbeatNotShorterThanLease { heartbeat: Duration, lease: Duration },

    #[error("acquisition retry interval ({retry:?}) must be shorter than lease duration ({lease:?})")]
    RetryNotShorterThanLease { retry: Duration, lease: Duration },

    #[error("operation timeout ({timeout:?}) must be shorter than heartbeat interval ({heartbeat:?})")]
    TimeoutNotShorterThanHeartbeat { timeout: Duration, heartbeat: Duration },

    #[error("startup attempts must be at least 1")]
    NoStartupAttempts,

    #[error("{field} is out of range")]
    DurationOutOfRange { field: &'static str },

    #[error("shutdown timeout ({shutdown:?}) must cover a read and a delete (2 x {timeout:?})")]
    ShutdownTimeoutTooShort { shutdown: Duration, timeout: Duration },

    #[error("STORAGE_TYPE is not set (memory | redis | postgres)")]
    MissingStorageType,

    #[error("unknown STORAGE_TYPE: {0}")]
    UnknownStorageType(String),
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lease_duration: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(10_000),
            acquisition_retry_interval: Duration::from_millis(5_000),
            operation_timeout: Duration::from_millis(5_000),
            startup_attempts: 3,
            startup_backoff: Duration::from_millis(500),
            shutdown_timeout: Duration::from_millis(10_000),
        }
    }
}

impl ElectionConfig {
    pub fn new(lock_name: impl Into<String>) -> Self {
        Self {
            lock_name: lock_name.into(),
            ..Self::default()
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_acquisition_retry_interval(mut self, interval: Duration) -> Self {
        self.acquisition_retry_interval = interval;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_startup_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.startup_attempts = attempts;
        self.startup_backoff = backoff;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();

        let lock_name = env::var("LOCK_NAME").unwrap_or(defaults.lock_name);

        Self {
            lock_name,
            lease_duration: env_millis("LEASE_DURATION_MS", defaults.lease_duration),
            heartbeat_interval: env_millis("HEARTBEAT_INTERVAL_MS", defaults.heartbeat_interval),
            acquisition_retry_interval: env_millis(
                "ACQUISITION_RETRY_INTERVAL_MS",
                defaults.acquisition_retry_interval,
            ),
            operation_timeout: env_millis("OPERATION_TIMEOUT_MS", defaults.operation_timeout),
            startup_attempts: env_parse("STARTUP_ACQUIRE_ATTEMPTS", defaults.startup_attempts),
            startup_backoff: env_millis("STARTUP_BACKOFF_MS", defaults.startup_backoff),
            shutdown_timeout: env_millis("SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
        }
    }

    /// 校验配置，心跳间隔必须小于租约时长
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_name.trim().is_empty() {
            return Err(ConfigError::EmptyLockName);
        }

        for (field, value) in [
            ("lease duration", self.lease_duration),
            ("heartbeat interval", self.heartbeat_interval),
            ("acquisition retry interval", self.acquisition_retry_interval),
            ("operation timeout", self.operation_timeout),
            ("shutdown timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if lease_expiry(Utc::now(), self.lease_duration).is_err() {
            return Err(ConfigError::DurationOutOfRange {
                field: "lease duration",
            });
        }

        if self.heartbeat_interval >= self.lease_duration {
            return Err(ConfigError::HeartbeatNotShorterThanLease {
                heartbeat: self.heartbeat_interval,
                lease: self.lease_duration,
            });
        }

        if self.acquisition_retry_interval >= self.lease_duration {
            return Err(ConfigError::RetryNotShorterThanLease {
                retry: self.acquisition_retry_interval,
                lease: self.lease_duration,
            });
        }

        if self.operation_timeout >= self.heartbeat_interval {
            return Err(ConfigError::TimeoutNotShorterThanHeartbeat {
                timeout: self.operation_timeout,
                heartbeat: self.heartbeat_interval,
            });
        }

        // 释放需要一次读取加一次删除
        if self.shutdown_timeout < self.operation_timeout.saturating_mul(2) {
            return Err(ConfigError::ShutdownTimeoutTooShort {
                shutdown: self.shutdown_timeout,
                timeout: self.operation_timeout,
            });
        }

        if self.startup_attempts == 0 {
            return Err(ConfigError::NoStartupAttempts);
        }

        Ok(())
    }
}

impl StorageType {
    /// 必须显式选择存储，未设置或无法识别都视为配置错误
    pub fn parse(value: Option<&str>) -> Result<Self, ConfigError> {
        let value = value
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingStorageType)?;

        match value.as_str() {
            "memory" => Ok(StorageType::Memory),
            "redis" => Ok(StorageType::Redis),
            "postgres" | "postgresql" => Ok(StorageType::Postgres),
            _ => Err(ConfigError::UnknownStorageType(value)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_type = StorageType::parse(env::var("STORAGE_TYPE").ok().as_deref())?;

        let redis_url = if storage_type == StorageType::Redis {
            Some(env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()))
        } else {
            None
        };

        let redis_username = env::var("REDIS_USERNAME").ok();
        let redis_password = env::var("REDIS_PASSWORD").ok();
        let redis_db = env::var("REDIS_DB")
            .ok()
            .and_then(|s| s.parse::<i64>().ok());

        let database_url = if storage_type == StorageType::Postgres {
            Some(
                env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost:5432/cron_leader".to_string()),
            )
        } else {
            None
        };
        let database_max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5);

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env_parse("SERVER_PORT", 8080);

        Ok(Self {
            storage_type,
            redis_url,
            redis_username,
            redis_password,
            redis_db,
            database_url,
            database_max_connections,
            server_host,
            server_port,
            election: ElectionConfig::from_env(),
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
