use std::time::Duration;

pub use interfaces::defs::{
    CachedReport, Channel, ChatTransport, DeliveryOutcome, EmailTransport, Item, ItemSource,
    ReportGenerator, SendReceipt, Subscriber, SubscriberMeta, VersionDescriptor,
};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36".to_string(),
            timeout_seconds: 25,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_redirects: 5,
            min_host_interval_ms: 1000,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report generation failed: {0}")]
    Generation(String),

    #[error("Report generation timed out after {seconds}s")]
    GenerationTimeout { seconds: u64 },

    #[error("Recipient {id} is not subscribed")]
    NotSubscribed { id: String },

    #[error("Chat API error: {0}")]
    Chat(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, DigestError>;
