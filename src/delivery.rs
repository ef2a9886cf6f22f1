//! Delivery fan-out.
//!
//! Entries are delivered oldest first with two independent concurrency
//! bounds: a cap on entries in flight, and a cap on concurrent sends per
//! entry. An entry holds its slot for its whole recipient fan-out including
//! the inter-item pacing delay, so the pacing actually spaces traffic out
//! instead of just delaying completion.

use crate::Result;
use crate::config::DeliveryConfig;
use crate::render::Renderer;
use crate::sink::MessageSink;
use crate::types::{DeliveryReport, Entry, ItemOutcome, Subscription};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Fans rendered messages out to a subscription's recipients
pub struct Deliverer {
    sink: Arc<dyn MessageSink>,
    renderer: Renderer,
    config: DeliveryConfig,
}

impl Deliverer {
    /// Create a deliverer over a sink
    pub fn new(sink: Arc<dyn MessageSink>, config: DeliveryConfig) -> Self {
        Self {
            sink,
            renderer: Renderer::new(&config),
            config,
        }
    }

    /// Deliver a batch of entries, oldest first
    ///
    /// Each entry is delivered if at least one recipient accepts it; an entry
    /// with zero recipients is trivially delivered. Failed entries never abort
    /// their siblings. Returns `Err` only when every recipient of every entry
    /// failed.
    pub async fn deliver(&self, sub: &Subscription, entries: &[Entry]) -> Result<DeliveryReport> {
        if entries.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let item_slots = Arc::new(Semaphore::new(self.config.concurrent_items.max(1)));
        let recipient_slots = Arc::new(Semaphore::new(self.config.concurrent_recipients.max(1)));
        let last_index = entries.len() - 1;

        let tasks = entries.iter().enumerate().map(|(index, entry)| {
            let item_slots = item_slots.clone();
            let recipient_slots = recipient_slots.clone();
            async move {
                // Closed only on drop, so acquire cannot fail here
                let _slot = item_slots
                    .acquire()
                    .await
                    .map_err(|e| crate::Error::Other(format!("semaphore closed: {}", e)))?;

                let outcome = self
                    .deliver_entry(sub, entry, recipient_slots.as_ref())
                    .await;

                // Pace consecutive entries while still holding the item slot
                if index < last_index && !self.config.item_interval.is_zero() {
                    tokio::time::sleep(self.config.item_interval).await;
                }

                Ok::<ItemOutcome, crate::Error>(outcome)
            }
        });

        let mut outcomes = Vec::with_capacity(entries.len());
        for result in join_all(tasks).await {
            outcomes.push(result?);
        }

        let report = DeliveryReport { outcomes };
        info!(
            subscription = %sub.name,
            full = report.fully_delivered(),
            partial = report.partially_delivered(),
            failed = report.failed(),
            "Delivery batch finished"
        );

        // Every recipient of every entry failed: surface it so the cycle
        // leaves the baseline alone and retries next time
        if report.outcomes.iter().all(|o| !o.delivered()) {
            return Err(crate::Error::Delivery(format!(
                "all {} entries failed for every recipient of '{}'",
                report.outcomes.len(),
                sub.name
            )));
        }

        Ok(report)
    }

    /// Render one entry and send it to every recipient concurrently
    async fn deliver_entry(
        &self,
        sub: &Subscription,
        entry: &Entry,
        recipient_slots: &Semaphore,
    ) -> ItemOutcome {
        let message = self.renderer.render(sub, entry);

        let sends = sub.recipients.iter().map(|recipient| {
            let message = &message;
            async move {
                let _slot = match recipient_slots.acquire().await {
                    Ok(slot) => slot,
                    Err(_) => return false,
                };

                match self.sink.send(recipient, message).await {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!(
                            subscription = %sub.name,
                            guid = %entry.guid,
                            platform = %recipient.platform,
                            address = %recipient.address,
                            "Recipient rejected message"
                        );
                        false
                    }
                    Err(e) => {
                        warn!(
                            subscription = %sub.name,
                            guid = %entry.guid,
                            platform = %recipient.platform,
                            address = %recipient.address,
                            error = %e,
                            "Send failed"
                        );
                        false
                    }
                }
            }
        });

        let results = join_all(sends).await;
        let recipients_ok = results.iter().filter(|ok| **ok).count();
        let recipients_failed = results.len() - recipients_ok;

        debug!(
            subscription = %sub.name,
            guid = %entry.guid,
            ok = recipients_ok,
            failed = recipients_failed,
            "Entry fan-out complete"
        );

        ItemOutcome {
            guid: entry.guid.clone(),
            published: entry.published,
            recipients_ok,
            recipients_failed,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelKind, OutboundMessage, Recipient};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sink that records sends and fails for configured addresses
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        failing_addresses: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingSink {
        fn new(failing: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing_addresses: failing.iter().map(|s| s.to_string()).collect(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn sent_to(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<bool> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            // Give concurrent sends a chance to overlap
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_addresses.contains(&recipient.address) {
                return Ok(false);
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.address.clone(), message.text.clone()));
            Ok(true)
        }
    }

    fn subscription_with(addresses: &[&str]) -> Subscription {
        let mut sub = Subscription::new("news", "https://example.com/feed");
        sub.recipients = addresses
            .iter()
            .map(|a| Recipient {
                kind: ChannelKind::Direct,
                platform: "test".into(),
                address: a.to_string(),
            })
            .collect();
        sub
    }

    fn entries(count: usize) -> Vec<Entry> {
        (0..count)
            .map(|i| Entry {
                guid: format!("guid-{}", i),
                title: format!("Entry {}", i),
                link: format!("https://example.com/{}", i),
                body: String::new(),
                author: None,
                published: None,
                images: vec![],
                video_url: None,
            })
            .collect()
    }

    fn fast_config() -> DeliveryConfig {
        let mut config = DeliveryConfig::default();
        config.item_interval = Duration::from_millis(0);
        config
    }

    #[tokio::test]
    async fn all_recipients_receive_every_entry() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let deliverer = Deliverer::new(sink.clone(), fast_config());
        let sub = subscription_with(&["r1", "r2"]);

        let report = deliverer.deliver(&sub, &entries(3)).await.unwrap();

        assert_eq!(report.fully_delivered(), 3);
        assert_eq!(report.failed(), 0);
        assert_eq!(sink.sent_to().len(), 6, "3 entries x 2 recipients");
    }

    #[tokio::test]
    async fn partial_recipient_failure_still_counts_as_delivered() {
        let sink = Arc::new(RecordingSink::new(&["bad"]));
        let deliverer = Deliverer::new(sink, fast_config());
        let sub = subscription_with(&["good", "bad"]);

        let report = deliverer.deliver(&sub, &entries(1)).await.unwrap();

        assert_eq!(report.partially_delivered(), 1);
        assert!(report.outcomes[0].delivered());
        assert_eq!(report.outcomes[0].recipients_ok, 1);
        assert_eq!(report.outcomes[0].recipients_failed, 1);
    }

    #[tokio::test]
    async fn total_failure_returns_delivery_error() {
        let sink = Arc::new(RecordingSink::new(&["bad1", "bad2"]));
        let deliverer = Deliverer::new(sink, fast_config());
        let sub = subscription_with(&["bad1", "bad2"]);

        let result = deliverer.deliver(&sub, &entries(2)).await;

        assert!(matches!(result, Err(crate::Error::Delivery(_))));
    }

    #[tokio::test]
    async fn one_failed_entry_does_not_fail_the_batch() {
        // All sends succeed; failure isolation is per entry, so craft a sink
        // that fails only one entry's text
        struct OneEntryFails;
        #[async_trait]
        impl MessageSink for OneEntryFails {
            async fn send(&self, _r: &Recipient, message: &OutboundMessage) -> Result<bool> {
                Ok(!message.text.contains("Entry 1"))
            }
        }

        let deliverer = Deliverer::new(Arc::new(OneEntryFails), fast_config());
        let sub = subscription_with(&["r1"]);

        let report = deliverer.deliver(&sub, &entries(3)).await.unwrap();

        assert_eq!(report.fully_delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.outcomes[1].delivered());
    }

    #[tokio::test]
    async fn zero_recipients_is_trivially_successful() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let deliverer = Deliverer::new(sink.clone(), fast_config());
        let sub = subscription_with(&[]);

        let report = deliverer.deliver(&sub, &entries(2)).await.unwrap();

        assert_eq!(report.fully_delivered(), 2);
        assert!(sink.sent_to().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_report() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let deliverer = Deliverer::new(sink, fast_config());
        let sub = subscription_with(&["r1"]);

        let report = deliverer.deliver(&sub, &[]).await.unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn recipient_concurrency_is_bounded() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let mut config = fast_config();
        config.concurrent_items = 1;
        config.concurrent_recipients = 2;
        let deliverer = Deliverer::new(sink.clone(), config);

        let addresses: Vec<String> = (0..8).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let sub = subscription_with(&refs);

        deliverer.deliver(&sub, &entries(1)).await.unwrap();

        assert!(
            sink.max_in_flight.load(Ordering::SeqCst) <= 2,
            "at most 2 sends should overlap, saw {}",
            sink.max_in_flight.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn item_concurrency_is_bounded() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let mut config = fast_config();
        config.concurrent_items = 2;
        config.concurrent_recipients = 1;
        let deliverer = Deliverer::new(sink.clone(), config);
        let sub = subscription_with(&["r1"]);

        deliverer.deliver(&sub, &entries(6)).await.unwrap();

        // One recipient per entry, so in-flight sends track in-flight items
        assert!(sink.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn pacing_delay_spaces_out_entries() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let mut config = fast_config();
        config.concurrent_items = 1;
        config.item_interval = Duration::from_millis(50);
        let deliverer = Deliverer::new(sink, config);
        let sub = subscription_with(&["r1"]);

        let start = std::time::Instant::now();
        deliverer.deliver(&sub, &entries(3)).await.unwrap();
        let elapsed = start.elapsed();

        // Two inter-item gaps of 50ms; no gap after the final entry
        assert!(
            elapsed >= Duration::from_millis(100),
            "expected at least 100ms of pacing, took {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(400),
            "a trailing pacing delay would push this past 150ms + overhead, took {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn outcomes_preserve_entry_order() {
        let sink = Arc::new(RecordingSink::new(&[]));
        let deliverer = Deliverer::new(sink, fast_config());
        let sub = subscription_with(&["r1"]);

        let report = deliverer.deliver(&sub, &entries(4)).await.unwrap();
        let guids: Vec<&str> = report.outcomes.iter().map(|o| o.guid.as_str()).collect();
        assert_eq!(guids, vec!["guid-0", "guid-1", "guid-2", "guid-3"]);
    }
}
