pub mod reddit;
pub mod rss_feed;

use std::sync::Arc;

pub use reddit::RedditSource;
pub use rss_feed::RssFeedSource;

use crate::fetcher::Fetcher;
use crate::types::ItemSource;

/// The built-in catalogue, in the order items are presented to the generator.
/// Roughly four fifths English-language sources, one fifth Chinese-language.
pub fn default_sources(fetcher: Arc<Fetcher>) -> Vec<Arc<dyn ItemSource>> {
    let rss = |name: &str, url: &str, max_items: usize| RssFeedSource::new(name, url, max_items, fetcher.clone());

    vec![
        Arc::new(RedditSource::new(
            reddit::DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
            5,
            10,
            fetcher.clone(),
        )) as Arc<dyn ItemSource>,
        Arc::new(rss("Product Hunt", "https://www.producthunt.com/feed", 6).with_ai_filter()),
        Arc::new(rss("OpenAI Blog", "https://openai.com/blog/rss.xml", 4)),
        Arc::new(rss("Anthropic Blog", "https://www.anthropic.com/rss.xml", 4)),
        Arc::new(rss("Google DeepMind", "https://deepmind.google/blog/rss.xml", 4)),
        Arc::new(rss("Tech in Asia", "https://www.techinasia.com/feed", 4).with_ai_filter()),
        Arc::new(
            rss(
                "CNA Tech",
                "https://www.channelnewsasia.com/api/v1/rss-outbound-feed?_format=xml&category=10416",
                4,
            )
            .with_ai_filter(),
        ),
        Arc::new(rss("機器之心", "https://www.jiqizhixin.com/rss", 4)),
        Arc::new(rss("量子位", "https://www.qbitai.com/feed", 3)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchConfig;

    #[test]
    fn catalogue_names_are_unique() {
        let fetcher = Arc::new(Fetcher::new(FetchConfig::default()).unwrap());
        let sources = default_sources(fetcher);
        let mut names: Vec<String> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 9);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 9);
    }
}
