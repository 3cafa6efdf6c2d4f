//! Append-only log of chat messages that mention the audit keyword.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDate, NaiveDateTime};
use tracing::info;

use crate::types::Result;

pub const AUDIT_FILE: &str = "audit.log";

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub at: NaiveDateTime,
    pub chat_title: String,
    pub speaker: String,
    pub text: String,
}

impl AuditEntry {
    pub fn now(chat_title: impl Into<String>, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            at: Local::now().naive_local(),
            chat_title: chat_title.into(),
            speaker: speaker.into(),
            text: text.into(),
        }
    }

    /// One line per entry; embedded newlines are flattened.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] chat: {} | speaker: {} | text: {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.chat_title,
            self.speaker,
            self.text.replace(['\r', '\n'], " ")
        )
    }
}

pub struct AuditLog {
    dir: PathBuf,
    keyword: String,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>, keyword: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            keyword: keyword.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(AUDIT_FILE)
    }

    pub fn matches(&self, text: &str) -> bool {
        !self.keyword.is_empty() && text.contains(&self.keyword)
    }

    pub fn record(&self, entry: &AuditEntry) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.path())?;
        writeln!(file, "{}", entry.to_line())?;
        Ok(())
    }

    /// Moves the current log aside as `audit-YYYY-MM.log`, named for the
    /// month containing the day before `today`. Returns the archive path, or
    /// `None` when there was nothing to rotate.
    pub fn rotate(&self, today: NaiveDate) -> Result<Option<PathBuf>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.path();
        if !current.exists() {
            return Ok(None);
        }
        let archive = self.dir.join(archive_name(today));
        append_file(&current, &archive)?;
        fs::remove_file(&current)?;
        info!("Rotated audit log into {}", archive.display());
        Ok(Some(archive))
    }
}

fn archive_name(today: NaiveDate) -> String {
    let month = today
        .pred_opt()
        .map(|d| d.format("%Y-%m").to_string())
        .unwrap_or_else(|| today.format("%Y-%m").to_string());
    format!("audit-{}.log", month)
}

/// Appends so that a second rotation in the same month never clobbers the first.
fn append_file(from: &Path, to: &Path) -> Result<()> {
    let contents = fs::read(from)?;
    let mut out = OpenOptions::new().create(true).append(true).open(to)?;
    out.write_all(&contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("weekly-digest-audit-{}", Uuid::new_v4()))
    }

    #[test]
    fn records_matching_lines() {
        let dir = temp_dir();
        let log = AuditLog::new(&dir, "launch");
        assert!(log.matches("the launch is friday"));
        assert!(!log.matches("nothing here"));

        log.record(&AuditEntry::now("Team", "@ada", "launch\nmoved")).unwrap();
        log.record(&AuditEntry::now("Team", "@bob", "launch confirmed")).unwrap();
        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("speaker: @ada | text: launch moved"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rotation_names_previous_month() {
        let dir = temp_dir();
        let log = AuditLog::new(&dir, "launch");
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(log.rotate(today).unwrap().is_none());

        log.record(&AuditEntry::now("Team", "@ada", "launch")).unwrap();
        let archive = log.rotate(today).unwrap().unwrap();
        assert!(archive.ends_with("audit-2025-02.log"));
        assert!(!log.path().exists());
        assert!(fs::read_to_string(archive).unwrap().contains("@ada"));
        fs::remove_dir_all(&dir).ok();
    }
}
