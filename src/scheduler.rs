//! Reconciliation scheduler.
//!
//! Runs periodic sweeps over all enabled subscriptions. Each sweep fetches a
//! subscription's feed, selects entries newer than its baseline with the
//! dedup ledger as a second line of defense, fans them out, and commits the
//! new baseline. Failures are contained at the subscription boundary: a
//! broken feed records a `last_error` and the sweep moves on.

use crate::config::Config;
use crate::db::Database;
use crate::delivery::Deliverer;
use crate::fetcher::FeedSource;
use crate::filter::ContentFilter;
use crate::registry::SubscriptionRegistry;
use crate::sink::MessageSink;
use crate::types::{Entry, Subscription};
use crate::{Error, Result, net_time};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drives reconciliation sweeps on a fixed cadence
pub struct Scheduler {
    db: Arc<Database>,
    registry: Arc<dyn SubscriptionRegistry>,
    source: Arc<dyn FeedSource>,
    deliverer: Deliverer,
    config: Config,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler over a ledger database, registry, feed source, and sink
    pub fn new(
        db: Arc<Database>,
        registry: Arc<dyn SubscriptionRegistry>,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn MessageSink>,
        config: Config,
    ) -> Self {
        let deliverer = Deliverer::new(sink, config.delivery.clone());
        Self {
            db,
            registry,
            source,
            deliverer,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal the run loop to stop after the current step
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run sweeps until shutdown is requested
    ///
    /// The first sweep is aligned to a network-time interval boundary when
    /// configured; later sweeps fire a plain interval apart. The ledger is
    /// pruned at startup and then every `prune_interval`.
    pub async fn run(&self) -> Result<()> {
        if !self.config.poll.enabled {
            info!("Polling disabled, scheduler not starting");
            return Ok(());
        }

        self.prune_ledger().await;

        let probe_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        let mut wait = net_time::initial_delay(&self.config.poll, &probe_client).await;
        info!(
            interval_secs = self.config.poll.interval.as_secs(),
            first_sweep_secs = wait.as_secs(),
            "Scheduler started"
        );

        let mut last_prune = tokio::time::Instant::now();
        loop {
            if self.sleep_interruptible(wait).await {
                info!("Scheduler stopped");
                return Ok(());
            }

            if let Err(e) = self.sweep().await {
                error!(error = %e, "Sweep failed");
            }

            if last_prune.elapsed() >= self.config.ledger.prune_interval {
                self.prune_ledger().await;
                last_prune = tokio::time::Instant::now();
            }

            wait = self.config.poll.interval;
        }
    }

    /// Sleep in one-second slices, returning true if shutdown was requested
    async fn sleep_interruptible(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        while tokio::time::Instant::now() < deadline {
            if self.is_shutting_down() {
                return true;
            }
            let remaining = deadline - tokio::time::Instant::now();
            tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
        }
        self.is_shutting_down()
    }

    /// Run one reconciliation sweep over all enabled subscriptions
    ///
    /// Per-subscription failures are recorded on the subscription and never
    /// abort the sweep.
    pub async fn sweep(&self) -> Result<()> {
        let subscriptions = self.registry.list_enabled().await?;
        info!(count = subscriptions.len(), "Sweep started");

        for mut sub in subscriptions {
            if self.is_shutting_down() {
                info!("Sweep interrupted by shutdown");
                break;
            }

            if let Err(e) = self.check_subscription(&mut sub).await {
                warn!(subscription = %sub.name, error = %e, "Subscription check failed");
                sub.last_error = Some(e.to_string());
                if let Err(e) = self.registry.update(&sub).await {
                    error!(subscription = %sub.name, error = %e, "Failed to record subscription error");
                }
            }
        }

        Ok(())
    }

    /// Reconcile one subscription: fetch, select, deliver, commit
    async fn check_subscription(&self, sub: &mut Subscription) -> Result<()> {
        let mut entries = self.source.fetch(&sub.url).await?;

        // Entries without a publish-time cannot be ordered against the
        // baseline and are excluded from reconciliation
        entries.retain(|e| e.published.is_some());

        if let Some(rules) = &sub.filters {
            if !rules.is_empty() {
                let filter = ContentFilter::new(rules);
                entries.retain(|e| filter.should_deliver(e));
            }
        }

        entries.sort_by_key(|e| e.published);

        let baseline = match sub.baseline {
            Some(baseline) => Some(baseline),
            None => match self.db.last_delivered_publish_time(&sub.id).await {
                Ok(recovered) => {
                    if let Some(recovered) = recovered {
                        info!(
                            subscription = %sub.name,
                            baseline = %recovered,
                            "Baseline recovered from delivery ledger"
                        );
                    }
                    recovered
                }
                Err(e) => {
                    warn!(subscription = %sub.name, error = %e, "Baseline recovery failed");
                    None
                }
            },
        };

        let candidates = match baseline {
            // Warm start: everything strictly newer than the baseline,
            // minus anything the ledger already saw
            Some(baseline) => {
                let newer: Vec<Entry> = entries
                    .into_iter()
                    .filter(|e| e.published.is_some_and(|p| p > baseline))
                    .collect();
                self.filter_already_delivered(sub, newer).await
            }
            // Cold start: deliver only the newest entry so a new
            // subscription does not replay the feed's whole history
            None => entries.pop().into_iter().collect(),
        };

        let cap = sub.max_items_per_cycle.max(1) as usize;
        let skipped = candidates.len().saturating_sub(cap);
        let batch: Vec<Entry> = candidates.into_iter().skip(skipped).collect();
        if skipped > 0 {
            info!(
                subscription = %sub.name,
                skipped = skipped,
                cap = cap,
                "Backlog larger than per-cycle cap, keeping newest entries"
            );
        }

        if batch.is_empty() {
            debug!(subscription = %sub.name, "No new entries");
            return self.commit(sub, None).await;
        }

        if sub.recipients.is_empty() {
            // Nowhere to send: leave the baseline alone so the entries are
            // still eligible once recipients are configured
            debug!(subscription = %sub.name, entries = batch.len(), "No recipients configured, skipping delivery");
            return Ok(());
        }

        info!(
            subscription = %sub.name,
            entries = batch.len(),
            recipients = sub.recipients.len(),
            "Delivering new entries"
        );
        let report = self.deliverer.deliver(sub, &batch).await?;

        let mut delivered_max = None;
        for outcome in report.delivered_outcomes() {
            let Some(published) = outcome.published else {
                continue;
            };
            if let Err(e) = self.db.record_delivery(&outcome.guid, &sub.id, published).await {
                // A missing ledger record risks one duplicate, not a loss
                warn!(
                    subscription = %sub.name,
                    guid = %outcome.guid,
                    error = %e,
                    "Failed to record delivery"
                );
            }
            if delivered_max.is_none_or(|max| published > max) {
                delivered_max = Some(published);
            }
        }

        self.commit(sub, delivered_max).await
    }

    /// Drop candidates the ledger has already seen
    ///
    /// A ledger read failure keeps the entry: a duplicate delivery beats a
    /// silently lost one.
    async fn filter_already_delivered(
        &self,
        sub: &Subscription,
        candidates: Vec<Entry>,
    ) -> Vec<Entry> {
        let mut kept = Vec::with_capacity(candidates.len());
        for entry in candidates {
            match self.db.is_delivered(&entry.guid, &sub.id).await {
                Ok(true) => {
                    debug!(subscription = %sub.name, guid = %entry.guid, "Already delivered, skipping");
                }
                Ok(false) => kept.push(entry),
                Err(e) => {
                    warn!(
                        subscription = %sub.name,
                        guid = %entry.guid,
                        error = %e,
                        "Ledger check failed, treating entry as undelivered"
                    );
                    kept.push(entry);
                }
            }
        }
        kept
    }

    /// Persist a successful cycle: advance the baseline, clear the error
    async fn commit(
        &self,
        sub: &mut Subscription,
        delivered_max: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        if let Some(new_baseline) = delivered_max {
            // The baseline never moves backwards
            if sub.baseline.is_none_or(|current| new_baseline > current) {
                sub.baseline = Some(new_baseline);
            }
        }
        sub.last_error = None;
        self.registry.update(sub).await
    }

    async fn prune_ledger(&self) {
        let retention = match chrono::Duration::from_std(self.config.ledger.retention) {
            Ok(retention) => retention,
            Err(e) => {
                warn!(error = %e, "Ledger retention out of range, skipping prune");
                return;
            }
        };
        let cutoff = chrono::Utc::now() - retention;
        match self.db.prune_delivered_before(cutoff).await {
            Ok(0) => debug!("Ledger prune removed nothing"),
            Ok(removed) => info!(removed = removed, "Ledger pruned"),
            Err(e) => warn!(error = %e, "Ledger prune failed"),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{ChannelKind, FilterRules, OutboundMessage, Recipient};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Feed source serving a fixed, swappable entry list
    struct StaticFeed {
        entries: Mutex<Vec<Entry>>,
    }

    impl StaticFeed {
        fn new(entries: Vec<Entry>) -> Self {
            Self {
                entries: Mutex::new(entries),
            }
        }

        fn set(&self, entries: Vec<Entry>) {
            *self.entries.lock().unwrap() = entries;
        }
    }

    #[async_trait]
    impl FeedSource for StaticFeed {
        async fn fetch(&self, _url: &str) -> Result<Vec<Entry>> {
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    /// Sink that records guardable sends and can be switched to fail
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
            }
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, _recipient: &Recipient, message: &OutboundMessage) -> Result<bool> {
            if self.failing.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.sent.lock().unwrap().push(message.text.clone());
            Ok(true)
        }
    }

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 27, hour, minute, 0).unwrap()
    }

    fn entry(guid: &str, published: Option<DateTime<Utc>>) -> Entry {
        Entry {
            guid: guid.to_string(),
            title: format!("Title {}", guid),
            link: format!("https://example.com/{}", guid),
            body: String::new(),
            author: None,
            published,
            images: vec![],
            video_url: None,
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.delivery.item_interval = Duration::from_millis(0);
        config
    }

    struct Harness {
        scheduler: Scheduler,
        db: Arc<Database>,
        feed: Arc<StaticFeed>,
        sink: Arc<RecordingSink>,
        _db_file: NamedTempFile,
    }

    async fn setup(entries: Vec<Entry>) -> Harness {
        let db_file = NamedTempFile::new().expect("failed to create temp file");
        let db = Arc::new(
            Database::new(db_file.path())
                .await
                .expect("failed to create database"),
        );
        let feed = Arc::new(StaticFeed::new(entries));
        let sink = Arc::new(RecordingSink::new());

        let scheduler = Scheduler::new(
            db.clone(),
            db.clone(),
            feed.clone(),
            sink.clone(),
            fast_config(),
        );

        Harness {
            scheduler,
            db,
            feed,
            sink,
            _db_file: db_file,
        }
    }

    fn subscription() -> Subscription {
        let mut sub = Subscription::new("news", "https://example.com/feed");
        sub.recipients = vec![Recipient {
            kind: ChannelKind::Direct,
            platform: "test".into(),
            address: "r1".into(),
        }];
        sub
    }

    async fn insert(h: &Harness, sub: &Subscription) {
        h.db.insert_subscription(sub).await.unwrap();
    }

    #[tokio::test]
    async fn cold_start_delivers_only_the_newest_entry() {
        let h = setup(vec![
            entry("old", Some(ts(8, 0))),
            entry("mid", Some(ts(9, 0))),
            entry("new", Some(ts(10, 0))),
        ])
        .await;
        insert(&h, &subscription()).await;

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 1, "cold start must not replay history");
        assert!(sent[0].contains("Title new"));

        let sub = h.db.list_subscriptions().await.unwrap().remove(0);
        assert_eq!(sub.baseline, Some(ts(10, 0)));
    }

    #[tokio::test]
    async fn catch_up_delivers_oldest_first_and_advances_baseline() {
        let h = setup(vec![
            entry("c", Some(ts(10, 0))),
            entry("a", Some(ts(8, 0))),
            entry("b", Some(ts(9, 0))),
        ])
        .await;
        let mut sub = subscription();
        sub.baseline = Some(ts(7, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("Title a"), "oldest entry goes first");
        assert!(sent[2].contains("Title c"));

        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(sub.baseline, Some(ts(10, 0)));
    }

    #[tokio::test]
    async fn unchanged_feed_is_not_redelivered() {
        let h = setup(vec![entry("a", Some(ts(8, 0))), entry("b", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(7, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();
        assert_eq!(h.sink.sent_texts().len(), 2);

        h.scheduler.sweep().await.unwrap();
        assert_eq!(
            h.sink.sent_texts().len(),
            2,
            "second sweep over the same feed must deliver nothing"
        );
    }

    #[tokio::test]
    async fn backlog_is_capped_to_the_newest_entries() {
        let entries: Vec<Entry> = (0..15)
            .map(|i| entry(&format!("e{:02}", i), Some(ts(8, i))))
            .collect();
        let h = setup(entries).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(7, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 10, "cap defaults to 10 entries per cycle");
        assert!(sent[0].contains("Title e05"), "the oldest 5 are dropped");
        assert!(sent[9].contains("Title e14"));

        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(sub.baseline, Some(ts(8, 14)));
    }

    #[tokio::test]
    async fn entries_without_publish_time_are_ignored() {
        let h = setup(vec![entry("undated", None), entry("dated", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(8, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Title dated"));
    }

    #[tokio::test]
    async fn filters_apply_before_selection() {
        let mut spam = entry("spam", Some(ts(10, 0)));
        spam.title = "Buy now".into();
        let h = setup(vec![entry("a", Some(ts(9, 0))), spam]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(8, 0));
        sub.filters = Some(FilterRules {
            whitelist: vec![],
            blacklist: vec!["buy now".into()],
            use_regex: false,
        });
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Title a"));

        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(
            sub.baseline,
            Some(ts(9, 0)),
            "a filtered entry must not advance the baseline"
        );
    }

    #[tokio::test]
    async fn baseline_recovers_from_the_ledger() {
        let h = setup(vec![entry("a", Some(ts(8, 0))), entry("b", Some(ts(9, 0)))]).await;
        let sub = subscription();
        insert(&h, &sub).await;
        // Ledger knows about "a"; the subscription record lost its baseline
        h.db.record_delivery("a", &sub.id, ts(8, 0)).await.unwrap();

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 1, "recovery must not fall back to cold start");
        assert!(sent[0].contains("Title b"));
    }

    #[tokio::test]
    async fn ledger_suppresses_redelivery_past_a_stale_baseline() {
        let h = setup(vec![entry("a", Some(ts(8, 0))), entry("b", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        // Baseline is stale, but the ledger already saw "a"
        sub.baseline = Some(ts(7, 0));
        insert(&h, &sub).await;
        h.db.record_delivery("a", &sub.id, ts(8, 0)).await.unwrap();

        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Title b"));
    }

    #[tokio::test]
    async fn partial_recipient_failure_still_commits() {
        struct OneBadRecipient;
        #[async_trait]
        impl MessageSink for OneBadRecipient {
            async fn send(&self, recipient: &Recipient, _m: &OutboundMessage) -> Result<bool> {
                Ok(recipient.address != "bad")
            }
        }

        let h = setup(vec![entry("a", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.recipients = ["good", "bad"]
            .iter()
            .map(|a| Recipient {
                kind: ChannelKind::Direct,
                platform: "test".into(),
                address: a.to_string(),
            })
            .collect();
        sub.baseline = Some(ts(8, 0));
        insert(&h, &sub).await;

        let scheduler = Scheduler::new(
            h.db.clone(),
            h.db.clone(),
            h.feed.clone(),
            Arc::new(OneBadRecipient),
            fast_config(),
        );
        scheduler.sweep().await.unwrap();

        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(
            sub.baseline,
            Some(ts(9, 0)),
            "one successful recipient is enough to commit"
        );
        assert!(h.db.is_delivered("a", &sub.id).await.unwrap());
    }

    #[tokio::test]
    async fn total_delivery_failure_blocks_commit_and_retries_next_sweep() {
        let h = setup(vec![entry("a", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(8, 0));
        insert(&h, &sub).await;

        h.sink.failing.store(true, Ordering::SeqCst);
        h.scheduler.sweep().await.unwrap();

        let after_failure = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(
            after_failure.baseline,
            Some(ts(8, 0)),
            "failed delivery must not advance the baseline"
        );
        assert!(after_failure.last_error.is_some());
        assert!(!h.db.is_delivered("a", &sub.id).await.unwrap());

        h.sink.failing.store(false, Ordering::SeqCst);
        h.scheduler.sweep().await.unwrap();

        assert_eq!(h.sink.sent_texts().len(), 1, "entry retried next sweep");
        let after_recovery = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(after_recovery.baseline, Some(ts(9, 0)));
        assert!(after_recovery.last_error.is_none(), "error cleared on success");
    }

    #[tokio::test]
    async fn fetch_failure_records_last_error_and_spares_other_subscriptions() {
        struct FailingFeed;
        #[async_trait]
        impl FeedSource for FailingFeed {
            async fn fetch(&self, url: &str) -> Result<Vec<Entry>> {
                if url.contains("broken") {
                    Err(Error::Feed(format!("HTTP 404: {}", url)))
                } else {
                    Ok(vec![entry("ok", Some(ts(9, 0)))])
                }
            }
        }

        let h = setup(vec![]).await;
        let scheduler = Scheduler::new(
            h.db.clone(),
            h.db.clone(),
            Arc::new(FailingFeed),
            h.sink.clone(),
            fast_config(),
        );

        let mut broken = subscription();
        broken.name = "broken".into();
        broken.url = "https://example.com/broken".into();
        insert(&h, &broken).await;
        let mut healthy = subscription();
        healthy.name = "healthy".into();
        healthy.baseline = Some(ts(8, 0));
        insert(&h, &healthy).await;

        scheduler.sweep().await.unwrap();

        let broken = h.db.get_subscription(&broken.id).await.unwrap();
        assert!(broken.last_error.as_deref().unwrap().contains("HTTP 404"));
        assert_eq!(
            h.sink.sent_texts().len(),
            1,
            "the healthy subscription still delivers"
        );
    }

    #[tokio::test]
    async fn zero_recipients_skips_delivery_without_commit() {
        let h = setup(vec![entry("a", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.recipients = vec![];
        sub.baseline = Some(ts(8, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        assert!(h.sink.sent_texts().is_empty());
        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert_eq!(
            sub.baseline,
            Some(ts(8, 0)),
            "entries stay eligible until recipients exist"
        );
    }

    #[tokio::test]
    async fn empty_cycle_clears_a_previous_error() {
        let h = setup(vec![]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(8, 0));
        sub.last_error = Some("HTTP 503: https://example.com/feed".into());
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();

        let sub = h.db.get_subscription(&sub.id).await.unwrap();
        assert!(sub.last_error.is_none());
    }

    #[tokio::test]
    async fn disabled_subscriptions_are_skipped() {
        let h = setup(vec![entry("a", Some(ts(9, 0)))]).await;
        let mut sub = subscription();
        sub.enabled = false;
        sub.baseline = Some(ts(8, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();
        assert!(h.sink.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn new_entries_after_catch_up_keep_flowing() {
        let h = setup(vec![entry("a", Some(ts(8, 0)))]).await;
        let mut sub = subscription();
        sub.baseline = Some(ts(7, 0));
        insert(&h, &sub).await;

        h.scheduler.sweep().await.unwrap();
        assert_eq!(h.sink.sent_texts().len(), 1);

        h.feed.set(vec![entry("a", Some(ts(8, 0))), entry("b", Some(ts(9, 0)))]);
        h.scheduler.sweep().await.unwrap();

        let sent = h.sink.sent_texts();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Title b"));
    }
}
