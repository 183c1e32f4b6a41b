use std::time::Duration;

use anyhow::{Context, Result};

use crate::utils::{CircuitBreakerConfig, RetryConfig};

// ============================================================================
// Runtime Configuration
// ============================================================================
//
// Read once at startup from `FULFILLMENT_*` / `SCYLLA_*` environment
// variables. Anything unset falls back to the defaults below.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentConfig {
    /// Upper bound for any single collaborator call
    pub collaborator_timeout: Duration,
    /// Minimum length of a cancellation reason, counted after trimming
    pub min_cancel_reason_len: usize,
    /// Fail `record_separation` when stock reservation cannot be recorded
    pub block_on_stock_failure: bool,
    pub stock_retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub metrics_port: u16,
    /// In-memory event store when unset
    pub scylla_uri: Option<String>,
    pub scylla_keyspace: String,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: Duration::from_secs(5),
            min_cancel_reason_len: 10,
            block_on_stock_failure: false,
            stock_retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            metrics_port: 9090,
            scylla_uri: None,
            scylla_keyspace: "fulfillment_ks".to_string(),
        }
    }
}

impl FulfillmentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let collaborator_timeout = match lookup("FULFILLMENT_COLLABORATOR_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .context("FULFILLMENT_COLLABORATOR_TIMEOUT_MS must be a number of milliseconds")?,
            ),
            None => defaults.collaborator_timeout,
        };

        let min_cancel_reason_len = match lookup("FULFILLMENT_MIN_CANCEL_REASON_LEN") {
            Some(raw) => raw
                .trim()
                .parse()
                .context("FULFILLMENT_MIN_CANCEL_REASON_LEN must be a non-negative integer")?,
            None => defaults.min_cancel_reason_len,
        };

        let block_on_stock_failure = match lookup("FULFILLMENT_BLOCK_ON_STOCK_FAILURE") {
            Some(raw) => parse_flag(&raw).context("FULFILLMENT_BLOCK_ON_STOCK_FAILURE must be true or false")?,
            None => defaults.block_on_stock_failure,
        };

        let metrics_port = match lookup("FULFILLMENT_METRICS_PORT") {
            Some(raw) => raw.trim().parse().context("FULFILLMENT_METRICS_PORT must be a port number")?,
            None => defaults.metrics_port,
        };

        let scylla_uri = lookup("SCYLLA_URI").filter(|uri| !uri.trim().is_empty());
        let scylla_keyspace = lookup("SCYLLA_KEYSPACE").unwrap_or(defaults.scylla_keyspace);

        Ok(Self {
            collaborator_timeout,
            min_cancel_reason_len,
            block_on_stock_failure,
            metrics_port,
            scylla_uri,
            scylla_keyspace,
            ..defaults
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized flag value '{}'", other),
    }
}
