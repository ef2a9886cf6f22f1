//! Network-time alignment for the first sweep.
//!
//! The local clock on small always-on boxes drifts. To keep sweeps firing on
//! predictable wall-clock boundaries, a few well-known endpoints are probed
//! with HEAD requests and their `Date` headers used to estimate the offset
//! between local and network time. The first sweep then fires on the next
//! interval boundary in network time. When every probe fails, the schedule
//! falls back to a plain interval delay.

use crate::config::PollConfig;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Estimate the offset between network time and the local clock
///
/// Endpoints are probed in order; the first one that answers with a
/// parseable `Date` header wins. The half round-trip is added to the header
/// time to account for transit.
pub async fn estimate_offset(
    client: &reqwest::Client,
    endpoints: &[String],
    per_probe_timeout: Duration,
) -> Option<chrono::Duration> {
    for endpoint in endpoints {
        let sent_at = Utc::now();
        let response = match client
            .head(endpoint)
            .timeout(per_probe_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "Time probe failed");
                continue;
            }
        };
        let received_at = Utc::now();

        let Some(date) = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|value| value.to_str().ok())
        else {
            debug!(endpoint = %endpoint, "Time probe response has no Date header");
            continue;
        };

        match DateTime::parse_from_rfc2822(date) {
            Ok(server_time) => {
                let rtt = received_at - sent_at;
                let offset = server_time.with_timezone(&Utc) + rtt / 2 - received_at;
                info!(
                    endpoint = %endpoint,
                    offset_ms = offset.num_milliseconds(),
                    rtt_ms = rtt.num_milliseconds(),
                    "Network time offset estimated"
                );
                return Some(offset);
            }
            Err(e) => {
                debug!(endpoint = %endpoint, date = %date, error = %e, "Unparseable Date header");
            }
        }
    }

    warn!("All time probes failed, scheduling against the local clock");
    None
}

/// Next interval boundary at or after `now`
///
/// Intervals shorter than an hour fire on minute multiples of the interval
/// counted from the epoch; longer intervals fire on the hour. A boundary
/// less than five seconds away is skipped so a sweep never fires into a
/// window that is already closing.
pub fn next_aligned_fire(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let interval_secs = interval.as_secs().max(60) as i64;
    let period = if interval_secs < 3600 {
        // Round to whole minutes so boundaries land on :00 seconds
        (interval_secs / 60) * 60
    } else {
        3600
    };

    let ts = now.timestamp();
    let mut next_ts = (ts / period + 1) * period;
    if next_ts - ts < 5 {
        next_ts += interval_secs;
    }

    match Utc.timestamp_opt(next_ts, 0).single() {
        Some(next) => next,
        None => now + chrono::Duration::seconds(interval_secs),
    }
}

/// Delay before the first sweep
///
/// With alignment disabled or every probe failing, this is just the poll
/// interval. Otherwise the delay runs to the next interval boundary in
/// network time.
pub async fn initial_delay(config: &PollConfig, client: &reqwest::Client) -> Duration {
    if !config.align_to_network_time {
        return config.interval;
    }

    let Some(offset) = estimate_offset(client, &config.probe_endpoints, config.probe_timeout).await
    else {
        return config.interval;
    };

    let now_net = Utc::now() + offset;
    let next = next_aligned_fire(now_net, config.interval);
    let wait = next - now_net;
    debug!(
        fires_at = %next,
        wait_secs = wait.num_seconds(),
        "First sweep aligned to network time"
    );
    wait.to_std().unwrap_or(config.interval)
}
