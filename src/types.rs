//! Core domain types: subscriptions, feed entries, delivery outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of delivery channel a recipient lives on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// One-on-one channel
    Direct,
    /// Shared channel with multiple members
    Group,
}

/// A delivery destination for a subscription
///
/// The triple of kind, platform, and address uniquely identifies a recipient
/// within a subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Direct or group channel
    pub kind: ChannelKind,
    /// Platform identifier (e.g., "webhook", "telegram")
    pub platform: String,
    /// Platform-specific channel address
    pub address: String,
}

/// Keyword or regex rules applied to an entry's title and body
///
/// Blacklist rules take priority over whitelist rules. With no rules set,
/// every entry is accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    /// At least one whitelist rule must match, if any are set
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Any blacklist match rejects the entry
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Treat rules as regular expressions instead of substring matches
    #[serde(default)]
    pub use_regex: bool,
}

impl FilterRules {
    /// True when no rules are configured
    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty()
    }
}

/// A watched feed and where its new entries get delivered
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    /// Opaque stable identifier (UUID v4 string)
    pub id: String,
    /// Human-readable name, unique per registry
    pub name: String,
    /// Feed locator
    pub url: String,
    /// Disabled subscriptions are skipped by the scheduler
    pub enabled: bool,
    /// Ordered delivery destinations
    pub recipients: Vec<Recipient>,
    /// Publish-time of the most recently delivered entry (None = never delivered)
    pub baseline: Option<DateTime<Utc>>,
    /// Most recent cycle failure, cleared on the next success
    pub last_error: Option<String>,
    /// Upper bound on entries delivered in a single cycle
    pub max_items_per_cycle: u32,
    /// Custom render template; None uses the built-in layout
    pub template: Option<String>,
    /// Content filter rules; None accepts everything
    pub filters: Option<FilterRules>,
    /// When the subscription was created
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription with a fresh UUID and default settings
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            enabled: true,
            recipients: Vec::new(),
            baseline: None,
            last_error: None,
            max_items_per_cycle: 10,
            template: None,
            filters: None,
            created_at: Utc::now(),
        }
    }
}

/// A normalized entry from an RSS or Atom feed
#[derive(Clone, Debug)]
pub struct Entry {
    /// Stable identifier, derived from the feed id or the query-stripped link
    pub guid: String,
    /// Entry title
    pub title: String,
    /// Entry link
    pub link: String,
    /// Cleaned body text (HTML stripped)
    pub body: String,
    /// Entry author, if the feed carries one
    pub author: Option<String>,
    /// Publication time; entries without one are excluded from reconciliation
    pub published: Option<DateTime<Utc>>,
    /// Image URLs collected from enclosures and body markup
    pub images: Vec<String>,
    /// Video link extracted by a cleanup strategy, if any
    pub video_url: Option<String>,
}

/// A rendered message ready to hand to a [`MessageSink`](crate::sink::MessageSink)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message text
    pub text: String,
    /// Image URLs to attach, already capped by the renderer
    pub images: Vec<String>,
}

/// Per-entry result of a delivery fan-out
#[derive(Clone, Debug)]
pub struct ItemOutcome {
    /// Entry guid
    pub guid: String,
    /// Entry publish-time
    pub published: Option<DateTime<Utc>>,
    /// Number of recipients that accepted the message
    pub recipients_ok: usize,
    /// Number of recipients that rejected or errored
    pub recipients_failed: usize,
}

impl ItemOutcome {
    /// An entry counts as delivered when at least one recipient succeeded,
    /// or trivially when there were no recipients to send to.
    pub fn delivered(&self) -> bool {
        self.recipients_ok > 0 || self.recipients_failed == 0
    }
}

/// Aggregate result of delivering a batch of entries
#[derive(Clone, Debug, Default)]
pub struct DeliveryReport {
    /// Per-entry outcomes, in delivery order
    pub outcomes: Vec<ItemOutcome>,
}

impl DeliveryReport {
    /// Entries where every recipient succeeded
    pub fn fully_delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.delivered() && o.recipients_failed == 0)
            .count()
    }

    /// Entries delivered to some recipients but not all
    pub fn partially_delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.delivered() && o.recipients_failed > 0)
            .count()
    }

    /// Entries where every recipient failed
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.delivered()).count()
    }

    /// Outcomes for entries that were delivered
    pub fn delivered_outcomes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| o.delivered())
    }
}
