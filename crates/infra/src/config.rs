//! Configuration loading and representation.
//!
//! Everything comes from environment variables so the same binary runs in
//! dev, CI and production without config files.

use std::time::Duration;

use thiserror::Error;

use stockflow_inventory::BatchPolicy;

use crate::feed::{DEFAULT_FEED_QUEUE_CAPACITY, FeedRetry};

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "STOCKFLOW_DB_MAX_CONNECTIONS";
pub const BATCH_POLICY: &str = "STOCKFLOW_BATCH_POLICY";
pub const FEED_MAX_ATTEMPTS: &str = "STOCKFLOW_FEED_MAX_ATTEMPTS";
pub const FEED_RETRY_DELAY_MS: &str = "STOCKFLOW_FEED_RETRY_DELAY_MS";
pub const FEED_QUEUE_CAPACITY: &str = "STOCKFLOW_FEED_QUEUE_CAPACITY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockflowConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub batch_policy: BatchPolicy,
    pub feed_retry: FeedRetry,
    pub feed_queue_capacity: usize,
}

impl Default for StockflowConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            batch_policy: BatchPolicy::default(),
            feed_retry: FeedRetry::default(),
            feed_queue_capacity: DEFAULT_FEED_QUEUE_CAPACITY,
        }
    }
}

impl StockflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = lookup(DATABASE_URL).filter(|v| !v.trim().is_empty());

        let max_connections = match lookup(DB_MAX_CONNECTIONS) {
            Some(raw) => parse_positive(DB_MAX_CONNECTIONS, &raw)?,
            None => defaults.max_connections,
        };

        let batch_policy = match lookup(BATCH_POLICY) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: BATCH_POLICY,
                value: raw,
            })?,
            None => defaults.batch_policy,
        };

        let mut feed_retry = defaults.feed_retry;
        if let Some(raw) = lookup(FEED_MAX_ATTEMPTS) {
            feed_retry.max_attempts = parse_positive(FEED_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(FEED_RETRY_DELAY_MS) {
            let ms: u32 = parse_positive(FEED_RETRY_DELAY_MS, &raw)?;
            feed_retry.base_delay = Duration::from_millis(u64::from(ms));
        }

        let feed_queue_capacity = match lookup(FEED_QUEUE_CAPACITY) {
            Some(raw) => parse_positive(FEED_QUEUE_CAPACITY, &raw)? as usize,
            None => defaults.feed_queue_capacity,
        };

        Ok(Self {
            database_url,
            max_connections,
            batch_policy,
            feed_retry,
            feed_queue_capacity,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = StockflowConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, StockflowConfig::default());
        assert_eq!(
            cfg.require_database_url().unwrap_err(),
            ConfigError::Missing(DATABASE_URL)
        );
    }

    #[test]
    fn reads_every_setting() {
        let cfg = StockflowConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://localhost/stock"),
            (DB_MAX_CONNECTIONS, "12"),
            (BATCH_POLICY, "all_or_nothing"),
            (FEED_MAX_ATTEMPTS, "3"),
            (FEED_RETRY_DELAY_MS, "10"),
            (FEED_QUEUE_CAPACITY, "64"),
        ]))
        .unwrap();

        assert_eq!(cfg.require_database_url().unwrap(), "postgres://localhost/stock");
        assert_eq!(cfg.max_connections, 12);
        assert_eq!(cfg.batch_policy, BatchPolicy::AllOrNothing);
        assert_eq!(cfg.feed_retry.max_attempts, 3);
        assert_eq!(cfg.feed_retry.base_delay, Duration::from_millis(10));
        assert_eq!(cfg.feed_queue_capacity, 64);
    }

    #[test]
    fn rejects_bad_values() {
        let err = StockflowConfig::from_lookup(lookup(&[(BATCH_POLICY, "yolo")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: BATCH_POLICY, .. }));

        let err = StockflowConfig::from_lookup(lookup(&[(DB_MAX_CONNECTIONS, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: DB_MAX_CONNECTIONS, .. }));

        let err = StockflowConfig::from_lookup(lookup(&[(FEED_QUEUE_CAPACITY, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: FEED_QUEUE_CAPACITY, .. }));
    }
}
