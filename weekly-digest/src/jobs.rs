use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::orchestrator::{Orchestrator, RunStatus, Trigger};
use crate::scheduler::ScheduledJob;
use crate::store::Store;

/// The weekly digest to every subscriber.
pub struct DigestJob {
    orchestrator: Arc<Orchestrator>,
}

impl DigestJob {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ScheduledJob for DigestJob {
    fn name(&self) -> String {
        "weekly digest".to_string()
    }

    async fn run(&self, now: NaiveDateTime) {
        info!("Weekly digest firing at {}", now);
        match self.orchestrator.run(Trigger::Scheduled).await {
            Ok(summary) if summary.status == RunStatus::Success => {
                info!("Weekly digest delivered ({} chars)", summary.report_len());
            }
            Ok(summary) if summary.status == RunStatus::NoRecipients => {}
            Ok(summary) => warn!(
                "Weekly digest finished {:?}: {} recipient(s) not fully delivered",
                summary.status,
                summary.tally.partially_delivered + summary.tally.failed
            ),
            // The next slot is the retry.
            Err(e) => error!("Weekly digest failed: {}", e),
        }
    }
}

/// Fires daily; only does work on the configured day of the month.
pub struct MaintenanceJob {
    day_of_month: u32,
    store: Arc<Store>,
    audit: Option<Arc<AuditLog>>,
}

impl MaintenanceJob {
    pub fn new(day_of_month: u32, store: Arc<Store>, audit: Option<Arc<AuditLog>>) -> Self {
        Self {
            day_of_month,
            store,
            audit,
        }
    }
}

#[async_trait]
impl ScheduledJob for MaintenanceJob {
    fn name(&self) -> String {
        "monthly maintenance".to_string()
    }

    async fn run(&self, now: NaiveDateTime) {
        if now.day() != self.day_of_month {
            debug!("Maintenance skipped, day {} is not {}", now.day(), self.day_of_month);
            return;
        }

        if let Some(audit) = &self.audit {
            match audit.rotate(now.date()) {
                Ok(Some(archive)) => info!("Audit log archived to {}", archive.display()),
                Ok(None) => debug!("No audit log to rotate"),
                Err(e) => error!("Audit log rotation failed: {}", e),
            }
        }

        let cache_age = self
            .store
            .reports
            .load()
            .map(|report| format!("{}h", (Utc::now() - report.generated_at).num_hours()))
            .unwrap_or_else(|| "none".to_string());
        info!(
            "Store summary: {} subscriber(s), cached report age {}, {} title(s) in dedup history",
            self.store.subscribers.count(),
            cache_age,
            self.store.dedup.load().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEntry;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[tokio::test]
    async fn maintenance_only_rotates_on_its_day() {
        let dir = std::env::temp_dir().join(format!("weekly-digest-jobs-{}", Uuid::new_v4()));
        let store = Arc::new(Store::open(&dir, 80));
        let audit = Arc::new(AuditLog::new(&dir, "launch"));
        audit.record(&AuditEntry::now("Team", "@ada", "launch")).unwrap();
        let job = MaintenanceJob::new(1, store, Some(audit.clone()));

        let second = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap().and_hms_opt(3, 0, 0).unwrap();
        job.run(second).await;
        assert!(audit.path().exists());

        let first = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap().and_hms_opt(3, 0, 0).unwrap();
        job.run(first).await;
        assert!(!audit.path().exists());
        assert!(dir.join("audit-2025-03.log").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
