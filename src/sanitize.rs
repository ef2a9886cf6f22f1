//! HTML cleanup for feed entry bodies.
//!
//! Feeds wrap their payloads in markup that varies by host. Cleanup is a
//! strategy table: each strategy claims feed URLs via [`ContentCleanup::matches`]
//! and turns raw HTML into plain text, optionally pulling out a video link.
//! The registry holds strategies in order with an always-matching default last.

use regex::Regex;
use std::sync::OnceLock;

/// Cleaned entry body
#[derive(Clone, Debug, Default)]
pub struct CleanedBody {
    /// Plain text with tags stripped and whitespace collapsed
    pub text: String,
    /// Video link extracted from the markup, if the strategy found one
    pub video_url: Option<String>,
}

/// A host-specific body cleanup strategy
pub trait ContentCleanup: Send + Sync {
    /// Whether this strategy applies to entries from the given feed URL
    fn matches(&self, feed_url: &str) -> bool;

    /// Clean raw HTML into plain text
    fn clean(&self, html: &str) -> CleanedBody;
}

/// Ordered strategy table with a catch-all default at the end
pub struct CleanupRegistry {
    strategies: Vec<Box<dyn ContentCleanup>>,
}

impl CleanupRegistry {
    /// Registry with the built-in strategies
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(VideoPortalCleanup),
                // The default must stay last; it matches everything
                Box::new(DefaultCleanup),
            ],
        }
    }

    /// Clean a body using the first strategy that claims the feed URL
    pub fn clean(&self, feed_url: &str, html: &str) -> CleanedBody {
        for strategy in &self.strategies {
            if strategy.matches(feed_url) {
                return strategy.clean(html);
            }
        }
        DefaultCleanup.clean(html)
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // pattern is a literal, cannot fail
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // pattern is a literal, cannot fail
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("valid regex"))
}

/// Strip tags, decode common entities, collapse runs of whitespace
fn strip_html(html: &str) -> String {
    // <br> and block boundaries become line breaks before tags are dropped
    let with_breaks = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n");

    let text = tag_regex().replace_all(&with_breaks, " ");
    let text = decode_entities(&text);
    let text = whitespace_regex().replace_all(&text, " ");

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode the entities that actually show up in feed bodies
fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Cleanup for video portal feeds whose bodies embed a "/video/" link
///
/// These bodies interleave the post text with cover images, bare dash
/// separators, and a trailing anchor pointing at the video page. The video
/// link is surfaced separately so the renderer can print it on its own line.
pub struct VideoPortalCleanup;

const VIDEO_PORTAL_HOSTS: &[&str] = &["bilibili"];

impl VideoPortalCleanup {
    fn video_link_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        #[allow(clippy::expect_used)] // pattern is a literal, cannot fail
        RE.get_or_init(|| {
            Regex::new(r#"https?://[^\s"'<>]+/video/[A-Za-z0-9]+"#).expect("valid regex")
        })
    }
}

impl ContentCleanup for VideoPortalCleanup {
    fn matches(&self, feed_url: &str) -> bool {
        let url = feed_url.to_lowercase();
        VIDEO_PORTAL_HOSTS.iter().any(|host| url.contains(host))
    }

    fn clean(&self, html: &str) -> CleanedBody {
        let video_url = Self::video_link_regex()
            .find(html)
            .map(|m| m.as_str().to_string());

        let text = strip_html(html);

        // Drop separator-only lines and lines that just repeat the video link
        let lines: Vec<&str> = text
            .lines()
            .filter(|line| {
                let trimmed = line.trim();
                !trimmed.is_empty()
                    && !matches!(trimmed, "-" | "—" | "–")
                    && video_url.as_deref() != Some(trimmed)
            })
            .collect();

        CleanedBody {
            text: lines.join("\n"),
            video_url,
        }
    }
}

/// Fallback cleanup: strip tags, decode entities, collapse whitespace
pub struct DefaultCleanup;

impl ContentCleanup for DefaultCleanup {
    fn matches(&self, _feed_url: &str) -> bool {
        true
    }

    fn clean(&self, html: &str) -> CleanedBody {
        CleanedBody {
            text: strip_html(html),
            video_url: None,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cleanup_strips_tags_and_entities() {
        let cleaned = DefaultCleanup.clean("<p>Tom &amp; Jerry</p><div>episode &quot;9&quot;</div>");

        assert_eq!(cleaned.text, "Tom & Jerry episode \"9\"");
        assert!(cleaned.video_url.is_none());
    }

    #[test]
    fn default_cleanup_collapses_whitespace() {
        let cleaned = DefaultCleanup.clean("a   lot\t\tof    space");
        assert_eq!(cleaned.text, "a lot of space");
    }

    #[test]
    fn br_tags_become_line_breaks() {
        let cleaned = DefaultCleanup.clean("first<br>second<br/>third");
        assert_eq!(cleaned.text, "first\nsecond\nthird");
    }

    #[test]
    fn video_portal_cleanup_extracts_the_video_link() {
        let html = concat!(
            "New upload!<br>-<br>",
            r#"<img src="https://cdn.example.com/cover.jpg"><br>"#,
            r#"<a href="https://www.bilibili.com/video/BV1xx411">watch</a>"#,
        );
        let cleaned = VideoPortalCleanup.clean(html);

        assert_eq!(
            cleaned.video_url.as_deref(),
            Some("https://www.bilibili.com/video/BV1xx411")
        );
        assert!(cleaned.text.contains("New upload!"));
        assert!(
            !cleaned.text.lines().any(|l| l.trim() == "-"),
            "separator-only lines should be dropped"
        );
    }

    #[test]
    fn video_portal_cleanup_handles_bodies_without_video() {
        let cleaned = VideoPortalCleanup.clean("<p>just text</p>");
        assert!(cleaned.video_url.is_none());
        assert_eq!(cleaned.text, "just text");
    }

    #[test]
    fn registry_routes_by_feed_url() {
        let registry = CleanupRegistry::new();

        let portal = registry.clean(
            "https://rsshub.example.com/bilibili/user/1234",
            r#"<a href="https://www.bilibili.com/video/BV1ab2cd">v</a>"#,
        );
        assert!(portal.video_url.is_some());

        let generic = registry.clean(
            "https://blog.example.com/feed.xml",
            r#"<a href="https://www.bilibili.com/video/BV1ab2cd">v</a>"#,
        );
        assert!(
            generic.video_url.is_none(),
            "non-portal feeds use the default strategy"
        );
    }

    #[test]
    fn registry_always_finds_a_strategy() {
        let registry = CleanupRegistry::new();
        let cleaned = registry.clean("https://anything.example.com", "<b>text</b>");
        assert_eq!(cleaned.text, "text");
    }
}
