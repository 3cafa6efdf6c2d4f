use anyhow::Result;
use async_trait::async_trait;

use crate::defs::Item;
use crate::defs::ReportGenerator;

struct PonderedHints {
    pub avoid: Vec<String>,
}

async fn ponder_hints(dedup_hints: &[String]) -> Result<PonderedHints> {
    Ok(PonderedHints {
        avoid: dedup_hints.iter().map(|hint| hint.to_lowercase()).collect(),
    })
}

#[derive(Clone)]
struct FocusedLine {
    pub source: String,
    pub line: String,
}

async fn ponder_item(item: &Item) -> Result<FocusedLine> {
    Ok(FocusedLine {
        source: item.source.clone(),
        line: format!(
            "  • <a href=\"{}\">{}</a>",
            escape(&item.url),
            escape(item.title.trim())
        ),
    })
}

async fn select_best(pondered_hints: &PonderedHints, items: &[Item]) -> Result<Vec<usize>> {
    Ok(items
        .iter()
        .enumerate()
        .filter(|(_, item)| {
            let title = item.title.trim().to_lowercase();
            !title.is_empty() && !pondered_hints.avoid.iter().any(|hint| hint == &title)
        })
        .map(|(index, _)| index)
        .collect())
}

async fn compose_report(best_lines: &[FocusedLine]) -> Result<String> {
    if best_lines.is_empty() {
        return Ok("<b>Weekly digest</b>\n\nNo new items this period.".to_owned());
    }
    let mut report = String::from("<b>Weekly digest</b>\n");
    let mut current_source: Option<&str> = None;
    for focused in best_lines {
        if current_source != Some(focused.source.as_str()) {
            report.push_str(&format!("\n<b>{}</b>\n", escape(&focused.source)));
            current_source = Some(focused.source.as_str());
        }
        report.push_str(&focused.line);
        report.push('\n');
    }
    Ok(report.trim_end().to_owned())
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Renders the collected items as a plain linked list, grouped by source in
/// first-seen order. Makes no external calls.
pub struct BaselineReportGenerator;

#[async_trait]
impl ReportGenerator for BaselineReportGenerator {
    fn name(&self) -> String {
        "baseline".to_owned()
    }

    async fn generate(&self, items: &[Item], dedup_hints: &[String]) -> Result<String> {
        let pondered_hints = ponder_hints(dedup_hints).await?;
        let best_indices = select_best(&pondered_hints, items).await?;
        let focused_lines = futures::future::join_all(best_indices.iter().map(|index| ponder_item(&items[*index])))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        compose_report(&focused_lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn groups_by_source_and_escapes() {
        let items = vec![
            Item::new("Reddit", "Rust & LLMs", "https://example.com/a"),
            Item::new("Reddit", "Second <post>", "https://example.com/b"),
            Item::new("OpenAI Blog", "Launch notes", "https://example.com/c"),
        ];
        let report = BaselineReportGenerator.generate(&items, &[]).await.unwrap();
        assert!(report.starts_with("<b>Weekly digest</b>"));
        assert!(report.contains("Rust &amp; LLMs"));
        assert!(report.contains("Second &lt;post&gt;"));
        assert_eq!(report.matches("<b>Reddit</b>").count(), 1);
        assert!(report.find("<b>Reddit</b>").unwrap() < report.find("<b>OpenAI Blog</b>").unwrap());
    }

    #[tokio::test]
    async fn skips_titles_listed_in_hints() {
        let items = vec![
            Item::new("Reddit", "Old news", "https://example.com/a"),
            Item::new("Reddit", "Fresh news", "https://example.com/b"),
        ];
        let report = BaselineReportGenerator
            .generate(&items, &["old news".to_owned()])
            .await
            .unwrap();
        assert!(!report.contains("Old news"));
        assert!(report.contains("Fresh news"));
    }

    #[tokio::test]
    async fn empty_input_still_yields_a_report() {
        let report = BaselineReportGenerator.generate(&[], &[]).await.unwrap();
        assert!(report.contains("No new items"));
    }
}
