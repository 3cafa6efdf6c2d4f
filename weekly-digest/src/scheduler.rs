use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Weekday};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySlot {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl WeeklySlot {
    pub fn new(weekday: Weekday, time: NaiveTime) -> Self {
        Self { weekday, time }
    }
}

impl std::fmt::Display for WeeklySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let day = match self.weekday {
            Weekday::Mon => "Monday",
            Weekday::Tue => "Tuesday",
            Weekday::Wed => "Wednesday",
            Weekday::Thu => "Thursday",
            Weekday::Fri => "Friday",
            Weekday::Sat => "Saturday",
            Weekday::Sun => "Sunday",
        };
        write!(f, "{} {}", day, self.time.format("%H:%M"))
    }
}

/// When a job becomes due. Daily granularity is the finest supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Weekly(WeeklySlot),
    Daily(NaiveTime),
}

impl Cadence {
    /// First matching instant strictly after `after`.
    pub fn next_after(&self, after: NaiveDateTime) -> NaiveDateTime {
        let (time, weekday) = match self {
            Cadence::Weekly(slot) => (slot.time, Some(slot.weekday)),
            Cadence::Daily(time) => (*time, None),
        };
        let mut day = after.date();
        loop {
            let candidate = day.and_time(time);
            let weekday_ok = weekday.is_none_or(|wd| day.weekday() == wd);
            if weekday_ok && candidate > after {
                return candidate;
            }
            day += ChronoDuration::days(1);
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Weekly(slot) => write!(f, "every {}", slot),
            Cadence::Daily(time) => write!(f, "daily {}", time.format("%H:%M")),
        }
    }
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> String;
    /// Runs the job body to completion. Failures are the job's own concern.
    async fn run(&self, now: NaiveDateTime);
}

struct Entry {
    cadence: Cadence,
    job: Arc<dyn ScheduledJob>,
    next_run: NaiveDateTime,
}

/// Cooperative poll-based scheduler on local wall-clock time.
///
/// Due jobs run one after another on the polling task, so a slow job delays
/// the next poll instead of overlapping with another job. Windows missed
/// while the process was down or a job was running are not replayed: after a
/// job fires its next run is computed from the current time.
pub struct Scheduler {
    entries: Vec<Entry>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            poll_interval,
        }
    }

    pub fn every(&mut self, cadence: Cadence, job: Arc<dyn ScheduledJob>, now: NaiveDateTime) {
        let next_run = cadence.next_after(now);
        info!("Scheduled {} {} (next run {})", job.name(), cadence, next_run);
        self.entries.push(Entry { cadence, job, next_run });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_runs(&self) -> Vec<(String, NaiveDateTime)> {
        self.entries.iter().map(|e| (e.job.name(), e.next_run)).collect()
    }

    /// Runs every job whose next run is at or before `now`, each at most once.
    /// Returns how many jobs fired.
    pub async fn run_pending(&mut self, now: NaiveDateTime) -> usize {
        let mut fired = 0;
        for entry in self.entries.iter_mut() {
            if now < entry.next_run {
                continue;
            }
            debug!("Running {} (due {})", entry.job.name(), entry.next_run);
            entry.job.run(now).await;
            entry.next_run = entry.cadence.next_after(now);
            fired += 1;
        }
        fired
    }

    /// Polls forever. Callers stop it by dropping or aborting the task.
    pub async fn run_forever(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler started with {} job(s), polling every {:?}", self.len(), self.poll_interval);
        loop {
            ticker.tick().await;
            self.run_pending(Local::now().naive_local()).await;
        }
    }
}
