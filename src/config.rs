//! Configuration types for feedcourier

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for the feed courier
///
/// Fields are organized into logical sub-configs:
/// - [`poll`](PollConfig) — cycle interval and network-time alignment
/// - [`fetch`](FetchConfig) — HTTP client settings for feed fetching
/// - [`retry`](RetryConfig) — backoff behavior for transient fetch failures
/// - [`delivery`](DeliveryConfig) — fan-out concurrency, pacing, rendering limits
/// - [`ledger`](LedgerConfig) — dedup record retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file (default: "data/feedcourier.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Polling cadence settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Feed fetching settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry settings for transient fetch failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Delivery fan-out settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Dedup ledger settings
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            poll: PollConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            delivery: DeliveryConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

/// Polling cadence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Whether the scheduler loop runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between reconciliation sweeps (default: 30 minutes)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,

    /// Align the first fire to an interval boundary in network time (default: true)
    ///
    /// When enabled, a small set of well-known endpoints is probed for a Date
    /// header to estimate the offset between local and network time, and the
    /// first sweep fires on the next interval boundary in network time.
    #[serde(default = "default_true")]
    pub align_to_network_time: bool,

    /// Endpoints probed for Date headers, tried in order
    #[serde(default = "default_probe_endpoints")]
    pub probe_endpoints: Vec<String>,

    /// Per-probe HTTP timeout (default: 3 seconds)
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_poll_interval(),
            align_to_network_time: true,
            probe_endpoints: default_probe_endpoints(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// Feed fetching configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total request timeout (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connect timeout (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Delivery fan-out configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum entries in flight at once (default: 3)
    #[serde(default = "default_concurrent_items")]
    pub concurrent_items: usize,

    /// Maximum concurrent sends per entry (default: 5)
    #[serde(default = "default_concurrent_recipients")]
    pub concurrent_recipients: usize,

    /// Pacing delay between consecutive entries (default: 3 seconds)
    ///
    /// Applied while the entry still holds its concurrency slot, and skipped
    /// after the final entry of a batch.
    #[serde(default = "default_item_interval", with = "duration_serde")]
    pub item_interval: Duration,

    /// Maximum rendered body length in characters (default: 200)
    #[serde(default = "default_max_body_length")]
    pub max_body_length: usize,

    /// Maximum images attached per message (default: 1)
    #[serde(default = "default_max_images")]
    pub max_images_per_item: usize,

    /// Default render template applied when a subscription has none
    #[serde(default)]
    pub default_template: Option<String>,

    /// Default per-cycle entry cap applied to new subscriptions (default: 10)
    #[serde(default = "default_max_items_per_cycle")]
    pub max_items_per_cycle: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            concurrent_items: default_concurrent_items(),
            concurrent_recipients: default_concurrent_recipients(),
            item_interval: default_item_interval(),
            max_body_length: default_max_body_length(),
            max_images_per_item: default_max_images(),
            default_template: None,
            max_items_per_cycle: default_max_items_per_cycle(),
        }
    }
}

/// Dedup ledger retention configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Keep records whose publish-time is within this window (default: 30 days)
    #[serde(default = "default_retention", with = "duration_serde")]
    pub retention: Duration,

    /// How often pruning runs between sweeps (default: 6 hours)
    #[serde(default = "default_prune_interval", with = "duration_serde")]
    pub prune_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            prune_interval: default_prune_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/feedcourier.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30 * 60) // 30 minutes
}

fn default_probe_endpoints() -> Vec<String> {
    vec![
        "https://www.google.com".to_string(),
        "https://www.cloudflare.com".to_string(),
        "https://www.bing.com".to_string(),
    ]
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    format!("feedcourier/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_concurrent_items() -> usize {
    3
}

fn default_concurrent_recipients() -> usize {
    5
}

fn default_item_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_max_body_length() -> usize {
    200
}

fn default_max_images() -> usize {
    1
}

fn default_max_items_per_cycle() -> u32 {
    10
}

fn default_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60) // 30 days
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(6 * 60 * 60) // 6 hours
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
