//! Digest runs: pick recipients, reuse or regenerate the report, fan it out.
//!
//! Generation is single-flight across the process. A trigger that finds a
//! generation already in progress waits for it and reuses the report it
//! cached instead of calling the generator a second time. The lock covers
//! collection, generation and both store writes, and is released before any
//! delivery starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channels::email::render_email;
use crate::config::{AppConfig, DedupConfig};
use crate::dedup::{self, TitleDedup};
use crate::delivery::{DeliveryFanout, DeliveryReport, RecipientTally};
use crate::store::Store;
use crate::types::{DigestError, Item, ItemSource, ReportGenerator, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Weekly run to every subscriber plus the email list.
    Scheduled,
    /// Preview for one subscribed recipient.
    Manual(String),
    /// Fresh generation without delivery.
    DryRun,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual(id) => write!(f, "manual({})", id),
            Trigger::DryRun => write!(f, "dry-run"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    NoRecipients,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::NoRecipients => 0,
            RunStatus::Partial | RunStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub trigger: Trigger,
    pub status: RunStatus,
    pub cache_reused: bool,
    pub report: Option<String>,
    pub delivery: DeliveryReport,
    pub tally: RecipientTally,
}

impl RunSummary {
    fn no_recipients(trigger: Trigger) -> Self {
        Self {
            trigger,
            status: RunStatus::NoRecipients,
            cache_reused: false,
            report: None,
            delivery: DeliveryReport::default(),
            tally: RecipientTally::default(),
        }
    }

    pub fn report_len(&self) -> usize {
        self.report.as_ref().map(|r| r.chars().count()).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub dedup: DedupConfig,
    pub generation_timeout: Duration,
    pub email_recipients: Vec<String>,
    pub email_subject_prefix: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dedup: config.dedup.clone(),
            generation_timeout: Duration::from_secs(config.generator.timeout_secs),
            email_recipients: config.email.as_ref().map(|e| e.recipients.clone()).unwrap_or_default(),
            email_subject_prefix: config
                .email
                .as_ref()
                .map(|e| e.subject_prefix.clone())
                .unwrap_or_default(),
        }
    }
}

struct Generated {
    body: String,
    reused: bool,
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<Store>,
    sources: Vec<Arc<dyn ItemSource>>,
    generator: Arc<dyn ReportGenerator>,
    fanout: DeliveryFanout,
    generation_lock: Mutex<()>,
    /// Bumped after every successful generation, under the lock.
    generation_epoch: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: Arc<Store>,
        sources: Vec<Arc<dyn ItemSource>>,
        generator: Arc<dyn ReportGenerator>,
        fanout: DeliveryFanout,
    ) -> Self {
        Self {
            settings,
            store,
            sources,
            generator,
            fanout,
            generation_lock: Mutex::new(()),
            generation_epoch: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Runs on the tokio runtime. Dropping the handle leaves the run going.
    pub fn spawn_run(self: &Arc<Self>, trigger: Trigger) -> JoinHandle<Result<RunSummary>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(trigger).await })
    }

    pub async fn run(&self, trigger: Trigger) -> Result<RunSummary> {
        self.run_with_recipients(trigger, None).await
    }

    /// Like `run`, but a scheduled run goes to `chat_override` instead of the
    /// registry when one is given.
    pub async fn run_with_recipients(&self, trigger: Trigger, chat_override: Option<Vec<String>>) -> Result<RunSummary> {
        info!("Starting {} run", trigger);
        // Any generation that completes after this point is reused.
        let seen_epoch = self.generation_epoch.load(Ordering::SeqCst);

        let (chat_recipients, email_recipients) = match &trigger {
            Trigger::Scheduled => (
                chat_override.unwrap_or_else(|| self.store.subscribers.list_ids()),
                if self.fanout.has_email() {
                    self.settings.email_recipients.clone()
                } else {
                    Vec::new()
                },
            ),
            Trigger::Manual(id) => {
                if !self.store.subscribers.is_subscribed(id) {
                    return Err(DigestError::NotSubscribed { id: id.clone() });
                }
                (vec![id.clone()], Vec::new())
            }
            Trigger::DryRun => (Vec::new(), Vec::new()),
        };

        if trigger == Trigger::Scheduled && chat_recipients.is_empty() && email_recipients.is_empty() {
            warn!("No subscribers and no email recipients, skipping scheduled run");
            return Ok(RunSummary::no_recipients(trigger));
        }
        info!(
            "Resolved {} chat and {} email recipient(s)",
            chat_recipients.len(),
            email_recipients.len()
        );

        let cached = match &trigger {
            Trigger::Manual(_) => self.store.reports.load(),
            _ => None,
        };
        let generated = match cached {
            Some(report) => {
                info!("Reusing cached report from {}", report.generated_at);
                Generated {
                    body: report.body,
                    reused: true,
                }
            }
            None => self.generate_single_flight(seen_epoch).await.inspect_err(|e| {
                error!("{} run aborted: {}", trigger, e);
            })?,
        };

        let mut delivery = DeliveryReport::default();
        if !chat_recipients.is_empty() {
            delivery.extend(self.fanout.deliver_chat(&generated.body, &chat_recipients).await);
        }
        if !email_recipients.is_empty() {
            let payload = render_email(
                &generated.body,
                &self.settings.email_subject_prefix,
                Local::now().date_naive(),
                &email_recipients,
            );
            delivery.extend(self.fanout.deliver_email(&payload).await);
        }

        let status = if trigger == Trigger::DryRun || delivery.all_succeeded() {
            RunStatus::Success
        } else if delivery.any_succeeded() {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
        let tally = delivery.tally();
        info!(
            "{} run finished: {:?}, {}/{} sends ok, {} recipient(s) fully delivered",
            trigger,
            status,
            delivery.succeeded(),
            delivery.attempted(),
            tally.fully_delivered
        );

        Ok(RunSummary {
            trigger,
            status,
            cache_reused: generated.reused,
            report: Some(generated.body),
            delivery,
            tally,
        })
    }

    /// `seen_epoch` is the epoch read when the run started.
    async fn generate_single_flight(&self, seen_epoch: u64) -> Result<Generated> {
        let _guard = self.generation_lock.lock().await;

        // Someone else finished a generation since this run started.
        if self.generation_epoch.load(Ordering::SeqCst) != seen_epoch {
            if let Some(report) = self.store.reports.load() {
                info!("Generation completed while waiting, reusing its report");
                return Ok(Generated {
                    body: report.body,
                    reused: true,
                });
            }
        }

        let body = self.generate_fresh().await?;
        self.generation_epoch.fetch_add(1, Ordering::SeqCst);
        Ok(Generated { body, reused: false })
    }

    async fn collect(&self) -> Vec<Item> {
        let results = join_all(self.sources.iter().map(|source| async move {
            match source.fetch().await {
                Ok(items) => {
                    info!("{}: {} item(s)", source.name(), items.len());
                    items
                }
                Err(e) => {
                    warn!("{} failed, continuing without it: {}", source.name(), e);
                    Vec::new()
                }
            }
        }))
        .await;
        results.into_iter().flatten().collect()
    }

    /// Collect, filter, generate, then write the cache before the history.
    async fn generate_fresh(&self) -> Result<String> {
        let collected = self.collect().await;
        let history = self.store.dedup.load();
        let collected_count = collected.len();
        let items = TitleDedup::new(&history, self.settings.dedup.prefix_len).filter(collected);
        info!(
            "Collected {} item(s), {} left after dedup against {} historical title(s)",
            collected_count,
            items.len(),
            history.len()
        );
        let hints = dedup::hint_sample(&history, self.settings.dedup.hint_sample);

        let started = Instant::now();
        let timeout = self.settings.generation_timeout;
        let body = match tokio::time::timeout(timeout, self.generator.generate(&items, &hints)).await {
            Err(_) => {
                return Err(DigestError::GenerationTimeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Err(DigestError::Generation(e.to_string())),
            Ok(Ok(body)) => body,
        };
        if body.trim().is_empty() {
            return Err(DigestError::Generation(format!("{} returned an empty report", self.generator.name())));
        }
        info!(
            "{} produced {} chars in {:?}",
            self.generator.name(),
            body.chars().count(),
            started.elapsed()
        );

        self.store.reports.store(&body, Utc::now())?;
        let remembered = self
            .store
            .dedup
            .replace(&dedup::next_history(&items, self.store.dedup.cap()))?;
        info!("Remembered {} title(s) for next period", remembered);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::types::{ChatTransport, SendReceipt};

    struct SilentChat;

    #[async_trait]
    impl ChatTransport for SilentChat {
        fn max_chunk_len(&self) -> usize {
            4000
        }

        async fn send_chunk(&self, _recipient_id: &str, _text: &str) -> anyhow::Result<SendReceipt> {
            Ok(SendReceipt::default())
        }
    }

    #[derive(Default)]
    struct NumberedGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReportGenerator for NumberedGenerator {
        fn name(&self) -> String {
            "numbered".to_string()
        }

        async fn generate(&self, _items: &[Item], _dedup_hints: &[String]) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("<b>Report #{}</b>", n))
        }
    }

    fn orchestrator(generator: Arc<NumberedGenerator>) -> (Orchestrator, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("weekly-digest-orchestrator-{}", Uuid::new_v4()));
        let settings = OrchestratorSettings {
            dedup: DedupConfig::default(),
            generation_timeout: Duration::from_secs(5),
            email_recipients: Vec::new(),
            email_subject_prefix: String::new(),
        };
        let orchestrator = Orchestrator::new(
            settings,
            Arc::new(Store::open(&dir, 80)),
            Vec::new(),
            generator,
            DeliveryFanout::new(Arc::new(SilentChat), None),
        );
        (orchestrator, dir)
    }

    #[tokio::test]
    async fn generation_finished_after_run_start_is_reused() {
        let generator = Arc::new(NumberedGenerator::default());
        let (orchestrator, dir) = orchestrator(generator.clone());

        let started = orchestrator.generation_epoch.load(Ordering::SeqCst);
        let first = orchestrator.generate_single_flight(started).await.unwrap();
        assert!(!first.reused);

        // Started before the first generation completed: reuse it.
        let late = orchestrator.generate_single_flight(started).await.unwrap();
        assert!(late.reused);
        assert_eq!(late.body, first.body);

        // Started afterwards: a fresh generation.
        let now = orchestrator.generation_epoch.load(Ordering::SeqCst);
        let fresh = orchestrator.generate_single_flight(now).await.unwrap();
        assert!(!fresh.reused);
        assert_eq!(fresh.body, "<b>Report #2</b>");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn exit_codes_follow_status() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::NoRecipients.exit_code(), 0);
        assert_eq!(RunStatus::Partial.exit_code(), 1);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
    }

    #[test]
    fn trigger_display() {
        assert_eq!(Trigger::Manual("42".to_string()).to_string(), "manual(42)");
        assert_eq!(Trigger::DryRun.to_string(), "dry-run");
    }
}
