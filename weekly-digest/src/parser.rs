use std::collections::HashSet;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use tracing::debug;

use crate::types::{DigestError, Result};

pub const TITLE_MAX_CHARS: usize = 150;
pub const SUMMARY_MAX_CHARS: usize = 250;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parses RSS or Atom content into entries in feed order.
///
/// Entries missing a title or a link are dropped, and so is any entry whose
/// link was already seen earlier in the same document.
pub fn parse_feed(content: &str) -> Result<Vec<FeedEntry>> {
    debug!("Parsing feed content ({} bytes)", content.len());
    let feed = parser::parse(content.as_bytes())
        .map_err(|e| DigestError::Parse(format!("Failed to parse feed: {}", e)))?;

    let mut seen_urls = HashSet::new();
    let mut entries = Vec::new();

    for entry in feed.entries {
        let title = entry.title.map(|t| t.content.trim().to_string()).unwrap_or_default();
        let url = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        if !seen_urls.insert(url.clone()) {
            debug!("Skipping duplicate entry with URL: {}", url);
            continue;
        }

        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();

        entries.push(FeedEntry {
            title: truncate_chars(&title, TITLE_MAX_CHARS),
            url,
            summary: truncate_chars(summary.trim(), SUMMARY_MAX_CHARS),
            published_at: entry.published.or(entry.updated).map(|dt| dt.with_timezone(&Utc)),
        });
    }

    Ok(entries)
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
