use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::fetcher::Fetcher;
use crate::parser::{truncate_chars, TITLE_MAX_CHARS};
use crate::types::{Item, ItemSource, Result};

pub const DEFAULT_SUBREDDITS: &[&str] = &["artificial", "MachineLearning", "LocalLLaMA", "ChatGPT", "singularity"];

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    permalink: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    stickied: bool,
}

/// Hot posts across several subreddits, ranked by score.
pub struct RedditSource {
    pub subreddits: Vec<String>,
    pub per_sub: usize,
    pub top_n: usize,
    fetcher: Arc<Fetcher>,
}

impl RedditSource {
    pub fn new(subreddits: Vec<String>, per_sub: usize, top_n: usize, fetcher: Arc<Fetcher>) -> Self {
        Self {
            subreddits,
            per_sub,
            top_n,
            fetcher,
        }
    }

    async fn fetch_subreddit(&self, sub: &str) -> Result<Vec<(i64, Item)>> {
        let url = format!("https://www.reddit.com/r/{}/hot.json?limit={}", sub, self.per_sub);
        let raw = self.fetcher.fetch_text(&url, Some("application/json")).await?;
        parse_listing(sub, &raw)
    }
}

fn parse_listing(sub: &str, raw: &str) -> Result<Vec<(i64, Item)>> {
    let listing: Listing = serde_json::from_str(raw)?;
    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| child.data)
        .filter(|post| !post.stickied)
        .map(|post| {
            let item = Item::new(
                format!("Reddit r/{}", sub),
                truncate_chars(post.title.trim(), TITLE_MAX_CHARS),
                format!("https://reddit.com{}", post.permalink),
            )
            .with_metadata("score", post.score.to_string())
            .with_metadata("comments", post.num_comments.to_string());
            (post.score, item)
        })
        .collect())
}

#[async_trait]
impl ItemSource for RedditSource {
    fn name(&self) -> String {
        "Reddit".to_string()
    }

    /// A failing subreddit is skipped; the others still count.
    async fn fetch(&self) -> anyhow::Result<Vec<Item>> {
        let mut ranked = Vec::new();
        for sub in &self.subreddits {
            match self.fetch_subreddit(sub).await {
                Ok(posts) => ranked.extend(posts),
                Err(e) => warn!("Reddit r/{} failed: {}", sub, e),
            }
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        let items: Vec<Item> = ranked.into_iter().take(self.top_n).map(|(_, item)| item).collect();
        info!("Pulled {} item(s) from Reddit", items.len());
        Ok(items)
    }
}
