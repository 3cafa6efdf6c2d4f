//! Cross-period near-duplicate suppression.
//!
//! A new item is a repeat when the first `prefix_len` characters of its
//! lowercased title appear anywhere inside a lowercased historical title.
//! Source titles get truncated and paraphrased between feeds, so a short
//! leading fragment catches most repeats without fuzzy matching.

use crate::types::Item;

#[derive(Debug, Clone)]
pub struct TitleDedup {
    prefix_len: usize,
    history: Vec<String>,
}

impl TitleDedup {
    pub fn new(history: &[String], prefix_len: usize) -> Self {
        Self {
            prefix_len,
            history: history.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn is_duplicate(&self, title: &str) -> bool {
        let prefix: String = title.trim().to_lowercase().chars().take(self.prefix_len).collect();
        // An empty prefix is a substring of everything.
        if prefix.is_empty() {
            return false;
        }
        self.history.iter().any(|seen| seen.contains(&prefix))
    }

    /// Keeps the non-duplicate items in their original order.
    pub fn filter(&self, items: Vec<Item>) -> Vec<Item> {
        items.into_iter().filter(|item| !self.is_duplicate(&item.title)).collect()
    }
}

pub fn filter(items: Vec<Item>, history: &[String], prefix_len: usize) -> Vec<Item> {
    TitleDedup::new(history, prefix_len).filter(items)
}

/// Historical titles passed to the generator as "avoid repeating" hints.
pub fn hint_sample(history: &[String], size: usize) -> Vec<String> {
    history.iter().take(size).cloned().collect()
}

/// Titles to remember for the next period, first occurrence wins.
pub fn next_history(items: &[Item], cap: usize) -> Vec<String> {
    let mut titles: Vec<String> = Vec::new();
    for item in items {
        let title = item.title.trim();
        if title.is_empty() || titles.iter().any(|t| t == title) {
            continue;
        }
        titles.push(title.to_string());
        if titles.len() == cap {
            break;
        }
    }
    titles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str) -> Item {
        Item::new("test", title, "https://example.com")
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let dedup = TitleDedup::new(&["OpenAI releases GPT-5 today".to_string()], 10);
        assert!(dedup.is_duplicate("OpenAI Releases gpt-5 today with new features"));
        assert!(!dedup.is_duplicate("Totally unrelated launch"));
    }

    #[test]
    fn prefix_may_appear_anywhere_in_history() {
        let dedup = TitleDedup::new(&["Breaking: Anthropic ships Claude update".to_string()], 10);
        assert!(dedup.is_duplicate("anthropic ships a new model"));
    }

    #[test]
    fn filter_preserves_order() {
        let history = vec!["Old story about chips".to_string()];
        let items = vec![item("First new thing"), item("Old story about chips again"), item("Second new thing")];
        let kept = filter(items, &history, 10);
        let titles: Vec<&str> = kept.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["First new thing", "Second new thing"]);
    }

    #[test]
    fn empty_history_and_empty_titles() {
        let dedup = TitleDedup::new(&[], 10);
        assert!(!dedup.is_duplicate("anything"));

        let dedup = TitleDedup::new(&["something".to_string()], 10);
        assert!(!dedup.is_duplicate("   "));
    }

    #[test]
    fn short_titles_use_the_whole_title() {
        let dedup = TitleDedup::new(&["The GPU shortage continues".to_string()], 10);
        assert!(dedup.is_duplicate("GPU"));
    }

    #[test]
    fn multibyte_titles_are_cut_on_char_boundaries() {
        let dedup = TitleDedup::new(&["人工智能大模型发布会今天举行".to_string()], 4);
        assert!(dedup.is_duplicate("人工智能行业报告"));
    }

    #[test]
    fn next_history_dedups_and_caps() {
        let items = vec![item("a"), item("b"), item("a"), item(""), item("c"), item("d")];
        assert_eq!(next_history(&items, 3), vec!["a", "b", "c"]);
    }
}
