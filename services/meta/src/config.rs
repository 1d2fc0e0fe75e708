//! Configuration for the metadata controller.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};

use crate::condition::{ConditionCronConfig, DEFAULT_CRON_QUEUE_CAPACITY};

/// Metadata controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Delay between checks of the same condition, in milliseconds.
    pub condition_cron_interval_ms: u64,

    /// Maximum offset gap for close-to-not-equal conditions.
    pub stuck_offset_dist: u64,

    /// Maximum number of conditions waiting in the cron queue.
    pub cron_queue_capacity: usize,

    /// Maximum number of pending metadata updates.
    pub update_queue_capacity: usize,

    /// Number of partition migrations allowed in flight.
    pub migrate_credits: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("ZP_META_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let condition_cron_interval_ms =
            parse_var(&lookup, "ZP_META_CONDITION_CRON_INTERVAL_MS", 1000)?;
        ensure!(
            condition_cron_interval_ms > 0,
            "ZP_META_CONDITION_CRON_INTERVAL_MS must be greater than zero"
        );

        Ok(Self {
            log_level,
            condition_cron_interval_ms,
            stuck_offset_dist: parse_var(
                &lookup,
                "ZP_META_STUCK_OFFSET_DIST",
                zp_reconcile::DEFAULT_STUCK_OFFSET_DIST,
            )?,
            cron_queue_capacity: parse_var(
                &lookup,
                "ZP_META_CRON_QUEUE_CAPACITY",
                DEFAULT_CRON_QUEUE_CAPACITY,
            )?,
            update_queue_capacity: parse_var(&lookup, "ZP_META_UPDATE_QUEUE_CAPACITY", 1024)?,
            migrate_credits: parse_var(&lookup, "ZP_META_MIGRATE_CREDITS", 16)?,
        })
    }

    /// Settings for the condition cron.
    pub fn condition_cron(&self) -> ConditionCronConfig {
        ConditionCronConfig {
            interval: Duration::from_millis(self.condition_cron_interval_ms),
            stuck_offset_dist: self.stuck_offset_dist,
            queue_capacity: self.cron_queue_capacity,
        }
    }
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        None => Ok(default),
    }
}
