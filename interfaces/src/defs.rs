use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One collected piece of content, as yielded by an external source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub source: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Item {
    pub fn new(source: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            url: url.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// Whatever the front-end knows about a recipient at subscribe time.
#[derive(Clone, Debug, Default)]
pub struct SubscriberMeta {
    pub display_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedReport {
    pub generated_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Chat,
    Email,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Chat => write!(f, "chat"),
            Channel::Email => write!(f, "email"),
        }
    }
}

/// Result of one transmission attempt. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryOutcome {
    pub recipient_id: String,
    pub channel: Channel,
    pub chunk_index: usize,
    pub success: bool,
    pub error_detail: Option<String>,
}

/// Static release descriptor shipped with a deployment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SendReceipt {
    pub message_id: Option<i64>,
}

// Collaborator seams. Sources swallow nothing themselves; the caller decides
// whether a failure degrades or aborts.

#[async_trait]
pub trait ItemSource: Send + Sync {
    fn name(&self) -> String;
    async fn fetch(&self) -> Result<Vec<Item>>;
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    fn name(&self) -> String;
    /// Turns raw items into the final formatted report. `dedup_hints` are
    /// titles from earlier periods that the report should not repeat.
    async fn generate(&self, items: &[Item], dedup_hints: &[String]) -> Result<String>;
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Maximum payload size of one message, in characters.
    fn max_chunk_len(&self) -> usize;
    async fn send_chunk(&self, recipient_id: &str, text: &str) -> Result<SendReceipt>;
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send_bulk(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        plain_body: &str,
    ) -> Result<()>;
}
