//! Configuration loading and representation.

use std::time::Duration;

use thiserror::Error;

use crate::projections::RetentionPolicy;
use crate::queue::DEFAULT_MAX_RETRIES;
use crate::workers::WorkerPoolConfig;

pub const ENV_MAX_RETRIES: &str = "PAYQUEUE_MAX_RETRIES";
pub const ENV_WORKERS: &str = "PAYQUEUE_WORKERS";
pub const ENV_POLL_INTERVAL_MS: &str = "PAYQUEUE_POLL_INTERVAL_MS";
pub const ENV_MAX_INACTIVITY_SECS: &str = "PAYQUEUE_MAX_INACTIVITY_SECS";
pub const ENV_RETENTION_DAYS: &str = "PAYQUEUE_RETENTION_DAYS";
pub const ENV_RETENTION_BATCH: &str = "PAYQUEUE_RETENTION_BATCH";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}' as a number")]
    NotANumber { var: &'static str, value: String },

    #[error("{var}: must be at least {min}, got {value}")]
    TooSmall { var: &'static str, min: u64, value: u64 },
}

/// Queue runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Retries granted to items enqueued without an explicit value (default: 5)
    pub max_retries: u32,
    /// Worker threads (default: 4)
    pub workers: usize,
    /// Idle wait between polls (default: 100ms)
    pub poll_interval: Duration,
    /// Running items without activity for this long are failed; `0` disables
    /// reaping (default: 300s)
    pub max_inactivity_secs: u64,
    /// Transaction log rows older than this are deleted (default: 60)
    pub retention_days: u32,
    /// Rows deleted per retention batch (default: 1000)
    pub retention_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            workers: 4,
            poll_interval: Duration::from_millis(100),
            max_inactivity_secs: 300,
            retention_days: 60,
            retention_batch: 1000,
        }
    }
}

impl QueueConfig {
    /// Read the `PAYQUEUE_*` environment variables; unset ones keep their
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |var: &'static str, default: u64, min: u64| -> Result<u64, ConfigError> {
            let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
                return Ok(default);
            };
            let value = raw.trim().parse::<u64>().map_err(|_| ConfigError::NotANumber {
                var,
                value: raw.clone(),
            })?;
            if value < min {
                return Err(ConfigError::TooSmall { var, min, value });
            }
            Ok(value)
        };

        Ok(Self {
            max_retries: narrow(ENV_MAX_RETRIES, read(ENV_MAX_RETRIES, defaults.max_retries.into(), 0)?)?,
            workers: narrow(ENV_WORKERS, read(ENV_WORKERS, defaults.workers as u64, 1)?)?,
            poll_interval: Duration::from_millis(read(
                ENV_POLL_INTERVAL_MS,
                defaults.poll_interval.as_millis() as u64,
                1,
            )?),
            max_inactivity_secs: read(ENV_MAX_INACTIVITY_SECS, defaults.max_inactivity_secs, 0)?,
            retention_days: narrow(
                ENV_RETENTION_DAYS,
                read(ENV_RETENTION_DAYS, defaults.retention_days.into(), 1)?,
            )?,
            retention_batch: narrow(
                ENV_RETENTION_BATCH,
                read(ENV_RETENTION_BATCH, defaults.retention_batch as u64, 1)?,
            )?,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_inactivity_secs(mut self, secs: u64) -> Self {
        self.max_inactivity_secs = secs;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_retention_batch(mut self, batch: usize) -> Self {
        self.retention_batch = batch;
        self
    }

    pub fn max_inactivity(&self) -> Option<chrono::Duration> {
        (self.max_inactivity_secs > 0)
            .then(|| chrono::Duration::seconds(i64::try_from(self.max_inactivity_secs).unwrap_or(i64::MAX)))
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_workers(self.workers)
            .with_poll_interval(self.poll_interval)
            .with_max_inactivity(self.max_inactivity())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::default()
            .with_max_age(chrono::Duration::days(self.retention_days.into()))
            .with_batch_size(self.retention_batch)
    }
}

fn narrow<T: TryFrom<u64>>(var: &'static str, value: u64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::NotANumber {
        var,
        value: value.to_string(),
    })
}
