//! Report generation through the Anthropic messages API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::types::{DigestError, Item, ReportGenerator, Result};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Groups items by source, keeping the order in which sources first appear.
fn group_by_source(items: &[Item]) -> Vec<(&str, Vec<&Item>)> {
    let mut groups: Vec<(&str, Vec<&Item>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(source, _)| *source == item.source) {
            Some((_, members)) => members.push(item),
            None => groups.push((item.source.as_str(), vec![item])),
        }
    }
    groups
}

fn describe_item(item: &Item) -> String {
    let mut line = format!("- {}", item.title);
    if let (Some(score), Some(comments)) = (item.metadata.get("score"), item.metadata.get("comments")) {
        line.push_str(&format!("  (score {}, {} comments)", score, comments));
    }
    line.push_str(&format!("  {}", item.url));
    line
}

pub fn build_prompt(items: &[Item], dedup_hints: &[String], date: NaiveDate) -> String {
    let context = if items.is_empty() {
        "(External collection was limited this week; rely on your own up-to-date knowledge of the AI industry.)"
            .to_string()
    } else {
        group_by_source(items)
            .into_iter()
            .map(|(source, members)| {
                let lines: Vec<String> = members.into_iter().map(describe_item).collect();
                format!("[{}]\n{}", source, lines.join("\n"))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let hints = if dedup_hints.is_empty() {
        String::new()
    } else {
        let listed: Vec<String> = dedup_hints.iter().map(|t| format!("- {}", t)).collect();
        format!(
            "\n\n[Already covered last period, do not repeat these topics]\n{}",
            listed.join("\n")
        )
    };

    format!(
        "You are an AI industry analyst writing the weekly AI trends report for a software \
company's engineering team (web product engineers, C++ engineers working on inference \
performance and edge deployment, plus PMs, QA and management).\n\n\
Report date: {date}\n\n\
Raw material collected this week:\n\n{context}{hints}\n\n\
Write the report from this material and your own knowledge. Structure it as:\n\
1. This week's core industry developments: three themes, each with two or three concrete news items.\n\
2. Selected tools for engineering: five tools or frameworks, each tagged as ready to use, worth evaluating, \
or worth watching, with why it is trending, its value for the team, and a link.\n\
3. Deeper observations: three short analyses of what these trends mean for the team.\n\n\
Output rules:\n\
- Use only these HTML tags: <b> <i> <a href=\"...\"> <code> <pre>.\n\
- Escape every literal &, < and > in text as &amp;, &lt; and &gt;.\n\
- Separate sections with a line of ─ characters.\n\
- Output the report only, with no preamble or closing remarks.",
        date = date.format("%Y/%m/%d"),
        context = context,
        hints = hints,
    )
}

pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| DigestError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
        // The orchestrator enforces the real deadline; this only stops a
        // connection from hanging forever.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs + 30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| format!("{}: {}", e.error.kind, e.error.message))
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(DigestError::Generation(format!("HTTP {}: {}", status, detail)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| DigestError::Generation(format!("malformed response: {}", e)))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(DigestError::Generation("response contained no text".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ReportGenerator for AnthropicGenerator {
    fn name(&self) -> String {
        format!("anthropic ({})", self.model)
    }

    async fn generate(&self, items: &[Item], dedup_hints: &[String]) -> anyhow::Result<String> {
        let prompt = build_prompt(items, dedup_hints, Local::now().date_naive());
        debug!("Prompt is {} chars for {} item(s)", prompt.chars().count(), items.len());
        let report = self.complete(&prompt).await?;
        info!("Model returned {} chars", report.chars().count());
        Ok(report)
    }
}
