//! Content filtering for feed entries.
//!
//! Rules apply to the entry's title and body combined. Blacklist rules have
//! the highest priority; if a whitelist exists, at least one of its rules
//! must match. Plain rules are case-insensitive substring matches; regex
//! rules are compiled once per filter with a bounded size.

use crate::types::{Entry, FilterRules};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

/// Compiled filter for a subscription
pub struct ContentFilter {
    whitelist: Vec<Matcher>,
    blacklist: Vec<Matcher>,
}

enum Matcher {
    Keyword(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Keyword(keyword) => text.to_lowercase().contains(keyword),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }
}

impl ContentFilter {
    /// Compile filter rules
    ///
    /// Invalid regex patterns are logged and skipped rather than failing the
    /// whole filter.
    pub fn new(rules: &FilterRules) -> Self {
        Self {
            whitelist: Self::compile(&rules.whitelist, rules.use_regex, "whitelist"),
            blacklist: Self::compile(&rules.blacklist, rules.use_regex, "blacklist"),
        }
    }

    fn compile(rules: &[String], use_regex: bool, kind: &str) -> Vec<Matcher> {
        rules
            .iter()
            .filter_map(|rule| {
                if use_regex {
                    match RegexBuilder::new(rule)
                        .case_insensitive(true)
                        .size_limit(1024 * 1024) // 1MB compiled size limit
                        .build()
                    {
                        Ok(regex) => Some(Matcher::Pattern(regex)),
                        Err(e) => {
                            warn!(pattern = %rule, kind = kind, error = %e, "Invalid filter pattern, skipping");
                            None
                        }
                    }
                } else {
                    Some(Matcher::Keyword(rule.to_lowercase()))
                }
            })
            .collect()
    }

    /// Decide whether an entry should be delivered
    pub fn should_deliver(&self, entry: &Entry) -> bool {
        if self.whitelist.is_empty() && self.blacklist.is_empty() {
            return true;
        }

        let content = format!("{} {}", entry.title, entry.body);

        // Blacklist has priority
        for matcher in &self.blacklist {
            if matcher.matches(&content) {
                debug!(guid = %entry.guid, "Entry rejected by blacklist");
                return false;
            }
        }

        if !self.whitelist.is_empty() {
            let matched = self.whitelist.iter().any(|m| m.matches(&content));
            if !matched {
                debug!(guid = %entry.guid, "Entry matched no whitelist rule");
            }
            return matched;
        }

        true
    }
}
