//! Message rendering.
//!
//! Turns a feed entry into an [`OutboundMessage`] using either a custom
//! template or the built-in layout. Rendering never fails: degenerate
//! input degrades to a minimal name/title/link message.

use crate::config::DeliveryConfig;
use crate::types::{Entry, OutboundMessage, Subscription};
use regex::RegexBuilder;
use tracing::warn;

/// Renders entries into outbound messages
pub struct Renderer {
    max_body_length: usize,
    max_images: usize,
    default_template: Option<String>,
}

impl Renderer {
    /// Create a renderer from the delivery configuration
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            max_body_length: config.max_body_length,
            max_images: config.max_images_per_item,
            default_template: config.default_template.clone(),
        }
    }

    /// Render an entry for a subscription
    ///
    /// The subscription's template wins over the configured default; with
    /// neither, the built-in layout is used.
    pub fn render(&self, sub: &Subscription, entry: &Entry) -> OutboundMessage {
        let template = sub
            .template
            .as_deref()
            .or(self.default_template.as_deref());

        let text = match template {
            Some(template) => {
                let rendered = self.render_template(template, sub, entry);
                if rendered.trim().is_empty() {
                    warn!(
                        subscription = %sub.name,
                        guid = %entry.guid,
                        "Template produced empty output, using built-in layout"
                    );
                    self.render_builtin(sub, entry)
                } else {
                    rendered
                }
            }
            None => self.render_builtin(sub, entry),
        };

        let images = entry
            .images
            .iter()
            .take(self.max_images)
            .cloned()
            .collect();

        OutboundMessage { text, images }
    }

    /// Substitute placeholders into a custom template
    fn render_template(&self, template: &str, sub: &Subscription, entry: &Entry) -> String {
        let published = entry
            .published
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let body = truncate(&entry.body, self.max_body_length);

        template
            .replace("{name}", &sub.name)
            .replace("{title}", &entry.title)
            .replace("{link}", &entry.link)
            .replace("{body}", &body)
            .replace("{published}", &published)
            .replace("{author}", entry.author.as_deref().unwrap_or_default())
            .replace("{guid}", &entry.guid)
    }

    /// Built-in layout: header, title, deduped body, metadata line, link
    fn render_builtin(&self, sub: &Subscription, entry: &Entry) -> String {
        let title = entry.title.trim();
        let published = entry
            .published
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string());
        let author = entry.author.as_deref().map(str::trim).filter(|a| !a.is_empty());

        let mut body = strip_leading_title(entry.body.trim(), title);
        body = truncate(&body, self.max_body_length);
        // A couple of leftover characters after dedup is noise, not content
        if body.chars().count() < 3 {
            body.clear();
        }

        let mut parts: Vec<String> = Vec::new();
        parts.push(format!("[{}]", sub.name));

        if !title.is_empty() {
            parts.push(title.to_string());
        }

        if !body.is_empty() || published.is_some() || author.is_some() {
            parts.push(String::new());
        }

        if !body.is_empty() {
            parts.push(body);
            parts.push(String::new());
        }

        let mut meta: Vec<String> = Vec::new();
        if let Some(published) = published {
            meta.push(published);
        }
        if let Some(author) = author {
            meta.push(author.to_string());
        }
        if !meta.is_empty() {
            parts.push(meta.join(" | "));
        }

        if let Some(video) = &entry.video_url {
            parts.push(format!("video: {}", video));
        }

        if !entry.link.is_empty() {
            parts.push(format!("link: {}", entry.link));
        }

        let text = parts.join("\n").trim().to_string();
        if text == format!("[{}]", sub.name) {
            // Nothing usable on the entry at all
            format!("[{}]\n{}\n{}", sub.name, entry.title, entry.link)
        } else {
            text
        }
    }
}

/// Remove a repeated copy of the title from the start of the body
///
/// Feeds frequently duplicate the title as the first line of the body,
/// sometimes quoted or repeated several times.
fn strip_leading_title(body: &str, title: &str) -> String {
    if body.is_empty() || title.is_empty() {
        return body.to_string();
    }

    let escaped = regex::escape(title);
    let pattern = format!(r#"^[\s"']*({escaped}[\s"']*)+[\s\-—:]*"#);
    match RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .size_limit(1024 * 1024)
        .build()
    {
        Ok(regex) => regex.replace(body, "").trim().to_string(),
        // A pathological title that blows the size limit just skips dedup
        Err(_) => body.to_string(),
    }
}

/// Truncate to a character limit with an ellipsis
fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_len).collect();
    format!("{}...", cut)
}
