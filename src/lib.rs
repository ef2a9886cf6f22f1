//! # feedcourier
//!
//! Watches RSS and Atom feeds and delivers new entries to configured
//! recipients, exactly once per entry per subscription.
//!
//! The crate is built around three pieces:
//! - a [`Scheduler`](scheduler::Scheduler) that sweeps enabled subscriptions
//!   on a fixed cadence, aligned to network time when configured
//! - a SQLite-backed delivery ledger ([`db::Database`]) providing dedup and
//!   baseline recovery
//! - a delivery fan-out ([`delivery::Deliverer`]) with bounded concurrency
//!   and pacing, sending through a pluggable [`sink::MessageSink`]
//!
//! ## Quick start
//!
//! ```no_run
//! use feedcourier::{Config, Database, Scheduler, Subscription, WebhookSink};
//! use feedcourier::fetcher::FeedFetcher;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> feedcourier::Result<()> {
//!     let config = Config::default();
//!     let db = Arc::new(Database::new(&config.database_path).await?);
//!
//!     let sub = Subscription::new("releases", "https://example.com/feed.xml");
//!     db.insert_subscription(&sub).await?;
//!
//!     let fetcher = Arc::new(FeedFetcher::new(&config.fetch, config.retry.clone())?);
//!     let sink = Arc::new(WebhookSink::new(Duration::from_secs(10), None)?);
//!     let scheduler = Scheduler::new(db.clone(), db, fetcher, sink, config);
//!
//!     feedcourier::run_with_shutdown(scheduler).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod net_time;
pub mod registry;
pub mod render;
pub mod retry;
pub mod sanitize;
pub mod scheduler;
pub mod sink;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{DatabaseError, Error, Result};
pub use registry::SubscriptionRegistry;
pub use scheduler::Scheduler;
pub use sink::{MessageSink, WebhookSink};
pub use types::{Entry, Recipient, Subscription};

use tracing::{error, info};

/// Run the scheduler until the process receives a shutdown signal
///
/// Listens for SIGTERM and SIGINT on Unix and Ctrl-C elsewhere. The
/// scheduler finishes its current step before the loop exits.
pub async fn run_with_shutdown(scheduler: Scheduler) -> Result<()> {
    let scheduler = std::sync::Arc::new(scheduler);
    let signal_scheduler = scheduler.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        signal_scheduler.shutdown();
    });

    scheduler.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, falling back to Ctrl-C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
