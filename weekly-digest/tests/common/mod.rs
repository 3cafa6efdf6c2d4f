#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use weekly_digest::config::DedupConfig;
use weekly_digest::delivery::DeliveryFanout;
use weekly_digest::{
    ChatTransport, EmailTransport, Item, ItemSource, Orchestrator, OrchestratorSettings, ReportGenerator, SendReceipt,
    Store,
};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn temp_data_dir() -> PathBuf {
    std::env::temp_dir().join(format!("weekly-digest-test-{}", Uuid::new_v4()))
}

/// Chat transport that records every chunk and fails for chosen recipients.
pub struct RecordingChat {
    limit: usize,
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChat {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            failing: HashSet::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, recipients: &[&str]) -> Self {
        self.failing = recipients.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(r, _)| r == recipient)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingChat {
    fn max_chunk_len(&self) -> usize {
        self.limit
    }

    async fn send_chunk(&self, recipient_id: &str, text: &str) -> anyhow::Result<SendReceipt> {
        if self.failing.contains(recipient_id) {
            anyhow::bail!("chat {} is unreachable", recipient_id);
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient_id.to_string(), text.to_string()));
        Ok(SendReceipt {
            message_id: Some(sent.len() as i64),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub plain_body: String,
}

pub struct RecordingEmail {
    fail: bool,
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmail {
    pub fn new() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_bulk(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        plain_body: &str,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("SMTP server refused the connection");
        }
        self.sent.lock().unwrap().push(SentEmail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
            plain_body: plain_body.to_string(),
        });
        Ok(())
    }
}

/// Generator that counts calls and remembers what it was given.
pub struct CountingGenerator {
    body: String,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    seen_items: Mutex<Vec<Vec<Item>>>,
    seen_hints: Mutex<Vec<Vec<String>>>,
}

impl CountingGenerator {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
            seen_items: Mutex::new(Vec::new()),
            seen_hints: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_items(&self) -> Vec<Item> {
        self.seen_items.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn last_hints(&self) -> Vec<String> {
        self.seen_hints.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ReportGenerator for CountingGenerator {
    fn name(&self) -> String {
        "counting".to_string()
    }

    async fn generate(&self, items: &[Item], dedup_hints: &[String]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_items.lock().unwrap().push(items.to_vec());
        self.seen_hints.lock().unwrap().push(dedup_hints.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            anyhow::bail!("401 invalid x-api-key");
        }
        Ok(self.body.clone())
    }
}

pub struct StaticSource {
    name: String,
    items: Vec<Item>,
    fail: bool,
}

impl StaticSource {
    pub fn new(name: &str, titles: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            items: titles
                .iter()
                .enumerate()
                .map(|(i, title)| Item::new(name, *title, format!("https://example.com/{}/{}", name, i)))
                .collect(),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl ItemSource for StaticSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn fetch(&self) -> anyhow::Result<Vec<Item>> {
        if self.fail {
            anyhow::bail!("connection reset by peer");
        }
        Ok(self.items.clone())
    }
}

pub fn settings(email_recipients: &[&str], timeout: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        dedup: DedupConfig::default(),
        generation_timeout: timeout,
        email_recipients: email_recipients.iter().map(|r| r.to_string()).collect(),
        email_subject_prefix: "[AI Weekly] ".to_string(),
    }
}

pub struct Harness {
    pub dir: PathBuf,
    pub store: Arc<Store>,
    pub chat: Arc<RecordingChat>,
    pub email: Option<Arc<RecordingEmail>>,
    pub generator: Arc<CountingGenerator>,
    pub orchestrator: Arc<Orchestrator>,
}

pub struct HarnessBuilder {
    chat: RecordingChat,
    email: Option<RecordingEmail>,
    email_recipients: Vec<&'static str>,
    generator: CountingGenerator,
    sources: Vec<Arc<dyn ItemSource>>,
    timeout: Duration,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            chat: RecordingChat::new(4000),
            email: None,
            email_recipients: Vec::new(),
            generator: CountingGenerator::new("<b>Weekly digest</b>\nAll the news."),
            sources: vec![Arc::new(StaticSource::new("Blog", &["Fresh model release", "New agent framework"]))],
            timeout: Duration::from_secs(5),
        }
    }

    pub fn chat(mut self, chat: RecordingChat) -> Self {
        self.chat = chat;
        self
    }

    pub fn email(mut self, email: RecordingEmail, recipients: &[&'static str]) -> Self {
        self.email = Some(email);
        self.email_recipients = recipients.to_vec();
        self
    }

    pub fn generator(mut self, generator: CountingGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn sources(mut self, sources: Vec<Arc<dyn ItemSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Harness {
        init_tracing();
        let dir = temp_data_dir();
        let store = Arc::new(Store::open(&dir, 80));
        let chat = Arc::new(self.chat);
        let email = self.email.map(Arc::new);
        let generator = Arc::new(self.generator);

        let fanout = DeliveryFanout::new(
            chat.clone(),
            email.clone().map(|e| e as Arc<dyn EmailTransport>),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            settings(&self.email_recipients, self.timeout),
            store.clone(),
            self.sources,
            generator.clone(),
            fanout,
        ));

        Harness {
            dir,
            store,
            chat,
            email,
            generator,
            orchestrator,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
