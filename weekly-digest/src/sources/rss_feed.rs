use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::fetcher::Fetcher;
use crate::parser::parse_feed;
use crate::types::{Item, ItemSource};

/// Lowercase keywords marking an entry as AI-related.
pub const AI_KEYWORDS: &[&str] = &[
    "ai",
    "llm",
    "gpt",
    "chatbot",
    "machine learning",
    "agent",
    "artificial intelligence",
    "automation",
    "model",
    "neural",
    "人工智能",
    "機器學習",
    "大模型",
    "生成式",
    "智能",
];

pub fn mentions_ai(text: &str) -> bool {
    let lower = text.to_lowercase();
    AI_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// One RSS or Atom feed.
pub struct RssFeedSource {
    pub name: String,
    pub url: String,
    pub max_items: usize,
    pub ai_filter: bool,
    fetcher: Arc<Fetcher>,
}

impl RssFeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, max_items: usize, fetcher: Arc<Fetcher>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            max_items,
            ai_filter: false,
            fetcher,
        }
    }

    pub fn with_ai_filter(mut self) -> Self {
        self.ai_filter = true;
        self
    }
}

#[async_trait]
impl ItemSource for RssFeedSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Item>> {
        let content = self.fetcher.fetch_text(&self.url, None).await?;
        let entries = parse_feed(&content)?;

        let items: Vec<Item> = entries
            .into_iter()
            .filter(|entry| !self.ai_filter || mentions_ai(&format!("{} {}", entry.title, entry.summary)))
            .take(self.max_items)
            .map(|entry| {
                let mut item = Item::new(&self.name, entry.title, entry.url);
                if !entry.summary.is_empty() {
                    item = item.with_metadata("summary", entry.summary);
                }
                if let Some(published) = entry.published_at {
                    item = item.with_metadata("published_at", published.to_rfc3339());
                }
                item
            })
            .collect();

        info!("Pulled {} item(s) from {}", items.len(), self.name);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_filter_is_case_insensitive() {
        assert!(mentions_ai("New LLM benchmark"));
        assert!(mentions_ai("大模型 推理加速"));
        assert!(!mentions_ai("Quarterly earnings call"));
    }
}
