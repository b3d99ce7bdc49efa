//! Configuration for the herald delivery binary.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_core::Destination;
use herald_delivery::{
    ClientConfig, RetryPolicy, RetryPolicyAction, DEFAULT_CONNECT_TIMEOUT_SECONDS,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RESPONSE_BODY_LIMIT, DEFAULT_RESPONSE_TIMEOUT_SECONDS,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "herald.toml";

/// Delivery client configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`herald.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only `DESTINATION_URL` has no usable default.
///
/// # Example
///
/// ```no_run
/// use herald::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("delivering to {}", config.destination_url);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // Destination
    /// Subscription the client delivers for.
    ///
    /// Environment variable: `SUBSCRIPTION_ID`
    #[serde(
        default = "default_subscription_id",
        alias = "SUBSCRIPTION_ID",
        deserialize_with = "string_or_number"
    )]
    pub subscription_id: String,
    /// Subscriber URL, `http://` or `https://`.
    ///
    /// Environment variable: `DESTINATION_URL`
    #[serde(default, alias = "DESTINATION_URL")]
    pub destination_url: String,
    /// Extra request headers as comma-separated `Name: value` pairs.
    ///
    /// Environment variable: `DESTINATION_HEADERS`
    #[serde(default, alias = "DESTINATION_HEADERS")]
    pub destination_headers: String,

    // Retry
    /// Retries allowed after the initial attempt.
    ///
    /// Environment variable: `MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts", alias = "MAX_RETRY_ATTEMPTS")]
    pub max_retry_attempts: u32,
    /// Fixed wait before each retry in seconds.
    ///
    /// Environment variable: `RETRY_INTERVAL_SECONDS`
    #[serde(default, alias = "RETRY_INTERVAL_SECONDS")]
    pub retry_interval_seconds: u64,
    /// `TerminateAfterRetries`, `SuspendRetries`, or anything else to skip
    /// the failing event and continue.
    ///
    /// Environment variable: `RETRY_POLICY_ACTION`
    #[serde(default = "default_policy_action", alias = "RETRY_POLICY_ACTION")]
    pub retry_policy_action: String,

    // Client
    /// Payloads held before new ones are dropped.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[serde(default = "default_queue_capacity", alias = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,
    /// Connect and TLS handshake deadline in seconds.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SECONDS`
    #[serde(default = "default_connect_timeout", alias = "CONNECT_TIMEOUT_SECONDS")]
    pub connect_timeout_seconds: u64,
    /// Request write and response read deadline in seconds.
    ///
    /// Environment variable: `RESPONSE_TIMEOUT_SECONDS`
    #[serde(default = "default_response_timeout", alias = "RESPONSE_TIMEOUT_SECONDS")]
    pub response_timeout_seconds: u64,
    /// Largest accepted response body in bytes.
    ///
    /// Environment variable: `RESPONSE_BODY_LIMIT`
    #[serde(default = "default_body_limit", alias = "RESPONSE_BODY_LIMIT")]
    pub response_body_limit: usize,

    // Logging
    /// Log filter.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, `herald.toml`, and environment
    /// variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(CONFIG_FILE))
                .merge(Env::prefixed("")),
        )
    }

    /// Extracts and validates a configuration from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the delivery client's configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            queue_capacity: self.queue_capacity,
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            response_timeout: Duration::from_secs(self.response_timeout_seconds),
            response_body_limit: self.response_body_limit,
            retry_policy: self.to_retry_policy(),
        }
    }

    /// Convert to the initial retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            interval: Duration::from_secs(self.retry_interval_seconds),
            action: RetryPolicyAction::from(self.retry_policy_action.as_str()),
        }
    }

    /// Build the destination from the URL and header list.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed URL, an unsupported scheme, or an
    /// invalid header.
    pub fn to_destination(&self) -> Result<Destination> {
        let headers = parse_header_list(&self.destination_headers)?;
        Destination::from_url(self.subscription_id.as_str(), &self.destination_url, &headers)
            .with_context(|| format!("invalid destination '{}'", self.destination_url))
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.destination_url.trim().is_empty() {
            anyhow::bail!("destination_url must be set");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.connect_timeout_seconds == 0 {
            anyhow::bail!("connect_timeout_seconds must be greater than 0");
        }

        if self.response_timeout_seconds == 0 {
            anyhow::bail!("response_timeout_seconds must be greater than 0");
        }

        if self.response_body_limit == 0 {
            anyhow::bail!("response_body_limit must be greater than 0");
        }

        self.to_destination()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscription_id: default_subscription_id(),
            destination_url: String::new(),
            destination_headers: String::new(),
            max_retry_attempts: default_retry_attempts(),
            retry_interval_seconds: 0,
            retry_policy_action: default_policy_action(),
            queue_capacity: default_queue_capacity(),
            connect_timeout_seconds: default_connect_timeout(),
            response_timeout_seconds: default_response_timeout(),
            response_body_limit: default_body_limit(),
            rust_log: default_log_level(),
        }
    }
}

/// Parses `Name: value, Other: value` into header pairs.
fn parse_header_list(list: &str) -> Result<Vec<(String, String)>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry
                .split_once(':')
                .with_context(|| format!("header '{entry}' is not in 'Name: value' form"))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Accepts a string or an integer; figment reads `SUBSCRIPTION_ID=42` as a
/// number.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Unsigned(u64),
        Signed(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(value) => value,
        StringOrNumber::Unsigned(value) => value.to_string(),
        StringOrNumber::Signed(value) => value.to_string(),
    })
}

fn default_subscription_id() -> String {
    "1".to_string()
}

fn default_retry_attempts() -> u32 {
    herald_delivery::retry::DEFAULT_MAX_RETRY_ATTEMPTS
}

fn default_policy_action() -> String {
    RetryPolicyAction::default().to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECONDS
}

fn default_response_timeout() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_SECONDS
}

fn default_body_limit() -> usize {
    DEFAULT_RESPONSE_BODY_LIMIT
}

fn default_log_level() -> String {
    "info,herald=debug".to_string()
}
