//! Feed fetching and normalization.
//!
//! [`FeedFetcher`] downloads a feed over HTTP with retry, parses it as RSS
//! first and Atom second, and normalizes both shapes into [`Entry`] values
//! with cleaned bodies. Entries come back in document order; selection and
//! ordering are the caller's concern.

use crate::config::{FetchConfig, RetryConfig};
use crate::retry::with_backoff;
use crate::sanitize::CleanupRegistry;
use crate::types::Entry;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Source of feed entries
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and normalize all entries of the feed at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>>;
}

/// HTTP feed fetcher with retry and body cleanup
pub struct FeedFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
    cleanup: CleanupRegistry,
}

impl FeedFetcher {
    /// Create a fetcher from the fetch and retry configuration
    pub fn new(fetch: &FetchConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch.timeout)
            .connect_timeout(fetch.connect_timeout)
            .user_agent(&fetch.user_agent)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry,
            cleanup: CleanupRegistry::new(),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<Entry>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!("HTTP {}: {}", status.as_u16(), url)));
        }

        let bytes = response.bytes().await?;
        let entries = parse_feed(&bytes, url, &self.cleanup)?;
        debug!(url = %url, entries = entries.len(), "Feed fetched");
        Ok(entries)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<Entry>> {
        with_backoff(&self.retry, || self.fetch_once(url)).await
    }
}

/// Parse a feed document, trying RSS first and Atom second
fn parse_feed(bytes: &[u8], feed_url: &str, cleanup: &CleanupRegistry) -> Result<Vec<Entry>> {
    match rss::Channel::read_from(bytes) {
        Ok(channel) => Ok(channel
            .items()
            .iter()
            .filter_map(|item| rss_entry(item, feed_url, cleanup))
            .collect()),
        Err(rss_err) => match atom_syndication::Feed::read_from(bytes) {
            Ok(feed) => Ok(feed
                .entries()
                .iter()
                .filter_map(|entry| atom_entry(entry, feed_url, cleanup))
                .collect()),
            Err(atom_err) => Err(Error::Feed(format!(
                "not a valid feed at {}: rss: {}, atom: {}",
                feed_url, rss_err, atom_err
            ))),
        },
    }
}

fn rss_entry(item: &rss::Item, feed_url: &str, cleanup: &CleanupRegistry) -> Option<Entry> {
    let link = item.link().unwrap_or_default().to_string();
    let guid = item
        .guid()
        .map(|g| g.value().to_string())
        .filter(|g| !g.is_empty())
        .or_else(|| stable_link_id(&link))
        .or_else(|| item.title().map(str::to_string))?;

    let raw_body = item
        .description()
        .or_else(|| item.content())
        .unwrap_or_default();
    let cleaned = cleanup.clean(feed_url, raw_body);

    let published = item
        .pub_date()
        .and_then(|date| match DateTime::parse_from_rfc2822(date) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                warn!(url = %feed_url, date = %date, error = %e, "Unparseable publish date");
                None
            }
        });

    let mut images = Vec::new();
    if let Some(enclosure) = item.enclosure() {
        if enclosure.mime_type().starts_with("image/") {
            images.push(enclosure.url().to_string());
        }
    }
    collect_inline_images(raw_body, &mut images);

    Some(Entry {
        guid,
        title: item.title().unwrap_or_default().trim().to_string(),
        link,
        body: cleaned.text,
        author: item.author().map(str::to_string),
        published,
        images,
        video_url: cleaned.video_url,
    })
}

fn atom_entry(
    entry: &atom_syndication::Entry,
    feed_url: &str,
    cleanup: &CleanupRegistry,
) -> Option<Entry> {
    let link = entry
        .links()
        .first()
        .map(|l| l.href().to_string())
        .unwrap_or_default();
    let guid = Some(entry.id().to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| stable_link_id(&link))?;

    let raw_body = entry
        .content()
        .and_then(|c| c.value())
        .or_else(|| entry.summary().map(|s| s.as_str()))
        .unwrap_or_default();
    let cleaned = cleanup.clean(feed_url, raw_body);

    let published = entry
        .published()
        .copied()
        .unwrap_or(*entry.updated())
        .with_timezone(&Utc);

    let mut images = Vec::new();
    collect_inline_images(raw_body, &mut images);

    Some(Entry {
        guid,
        title: entry.title().as_str().trim().to_string(),
        link,
        body: cleaned.text,
        author: entry.authors().first().map(|a| a.name().to_string()),
        published: Some(published),
        images,
        video_url: cleaned.video_url,
    })
}

/// Derive a stable identifier from an entry link
///
/// Query strings and fragments carry per-fetch noise (tracking parameters,
/// session tokens) and are dropped so the same entry hashes the same way
/// across fetches.
fn stable_link_id(link: &str) -> Option<String> {
    if link.is_empty() {
        return None;
    }
    match url::Url::parse(link) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            Some(url.to_string())
        }
        Err(_) => Some(link.to_string()),
    }
}

fn inline_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // pattern is a literal, cannot fail
    RE.get_or_init(|| {
        Regex::new(r#"(?:img[^>]+src|poster)\s*=\s*["'](https?://[^"']+)["']"#)
            .expect("valid regex")
    })
}

/// Pull image URLs out of raw entry markup, deduplicated in order
fn collect_inline_images(html: &str, images: &mut Vec<String>) {
    for capture in inline_image_regex().captures_iter(html) {
        let url = capture[1].to_string();
        if !images.contains(&url) {
            images.push(url);
        }
    }
}
