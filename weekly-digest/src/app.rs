//! Wires the configured components together for the binary.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use interfaces::BaselineReportGenerator;
use tracing::info;

use crate::audit::AuditLog;
use crate::bot::{BotFrontend, CommandHandler};
use crate::channels::{SmtpMailer, TelegramChannel};
use crate::config::{AppConfig, GeneratorKind};
use crate::delivery::DeliveryFanout;
use crate::fetcher::Fetcher;
use crate::generator::AnthropicGenerator;
use crate::jobs::{DigestJob, MaintenanceJob};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::scheduler::{Cadence, Scheduler};
use crate::sources::default_sources;
use crate::store::Store;
use crate::types::{EmailTransport, ReportGenerator, Result};
use crate::version::VersionBroadcast;

pub struct App {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub telegram: Arc<TelegramChannel>,
    pub fanout: DeliveryFanout,
    pub orchestrator: Arc<Orchestrator>,
    pub audit: Option<Arc<AuditLog>>,
}

impl App {
    /// Fails when a mandatory credential is missing or a client cannot be built.
    pub fn build(config: AppConfig) -> Result<Self> {
        config.require_delivery_credentials()?;

        let store = Arc::new(Store::open(&config.data_dir, config.dedup.history_cap));
        let telegram = Arc::new(TelegramChannel::new(&config.telegram)?);
        let email: Option<Arc<dyn EmailTransport>> = match &config.email {
            Some(email_config) => {
                info!("Email delivery enabled for {} recipient(s)", email_config.recipients.len());
                Some(Arc::new(SmtpMailer::new(email_config)?))
            }
            None => None,
        };
        let fanout = DeliveryFanout::new(telegram.clone(), email);

        let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
        let generator: Arc<dyn ReportGenerator> = match config.generator.kind {
            GeneratorKind::Anthropic => Arc::new(AnthropicGenerator::new(&config.generator)?),
            GeneratorKind::Baseline => Arc::new(BaselineReportGenerator),
        };
        info!("Using generator {}", generator.name());

        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorSettings::from_config(&config),
            store.clone(),
            default_sources(fetcher),
            generator,
            fanout.clone(),
        ));
        let audit = config
            .audit_keyword
            .clone()
            .map(|keyword| Arc::new(AuditLog::new(&config.data_dir, keyword)));

        Ok(Self {
            config,
            store,
            telegram,
            fanout,
            orchestrator,
            audit,
        })
    }

    pub fn scheduler(&self, now: NaiveDateTime) -> Scheduler {
        let schedule = &self.config.schedule;
        let mut scheduler = Scheduler::new(Duration::from_secs(schedule.poll_interval_secs));
        let digest = Arc::new(DigestJob::new(self.orchestrator.clone()));
        for slot in &schedule.slots {
            scheduler.every(Cadence::Weekly(*slot), digest.clone(), now);
        }
        scheduler.every(
            Cadence::Daily(schedule.maintenance_time),
            Arc::new(MaintenanceJob::new(
                schedule.maintenance_day,
                self.store.clone(),
                self.audit.clone(),
            )),
            now,
        );
        scheduler
    }

    pub fn bot(&self) -> BotFrontend {
        let handler = CommandHandler::new(self.store.clone(), self.audit.clone(), &self.config.schedule.slots);
        BotFrontend::new(self.telegram.clone(), handler, self.orchestrator.clone())
    }

    pub fn version_broadcast(&self) -> VersionBroadcast {
        VersionBroadcast::new(self.store.clone(), self.fanout.clone())
    }
}
