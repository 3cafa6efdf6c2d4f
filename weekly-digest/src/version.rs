//! Startup release-note broadcast.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::channels::telegram::escape_html;
use crate::delivery::{DeliveryFanout, DeliveryReport};
use crate::store::Store;
use crate::types::{DigestError, Result, VersionDescriptor};

pub fn load_descriptor(path: &Path) -> Result<VersionDescriptor> {
    let raw = std::fs::read_to_string(path)?;
    let descriptor: VersionDescriptor = serde_json::from_str(&raw)?;
    if descriptor.version.trim().is_empty() {
        return Err(DigestError::Config(format!("{} has an empty version", path.display())));
    }
    Ok(descriptor)
}

pub fn format_change_note(descriptor: &VersionDescriptor) -> String {
    let mut note = format!("<b>Updated to v{}</b>", escape_html(&descriptor.version));
    if !descriptor.date.is_empty() {
        note.push_str(&format!(" ({})", escape_html(&descriptor.date)));
    }
    note.push('\n');
    if !descriptor.notes.is_empty() {
        note.push('\n');
        for line in &descriptor.notes {
            note.push_str(&format!("• {}\n", escape_html(line)));
        }
    }
    note.trim_end().to_string()
}

#[derive(Debug, Clone)]
pub enum BroadcastOutcome {
    /// Marker already matches the deployed version; nothing was written.
    Unchanged,
    /// No marker existed. It is recorded now and nobody is notified.
    FirstInstall,
    Broadcast { previous: String, delivery: DeliveryReport },
}

pub struct VersionBroadcast {
    store: Arc<Store>,
    fanout: DeliveryFanout,
}

impl VersionBroadcast {
    pub fn new(store: Arc<Store>, fanout: DeliveryFanout) -> Self {
        Self { store, fanout }
    }

    /// Compares the deployed version with the stored marker. On a change the
    /// marker is written before anyone is notified, so a crash during the
    /// broadcast cannot cause a repeat on the next start.
    pub async fn check_and_broadcast(&self, descriptor: &VersionDescriptor) -> Result<BroadcastOutcome> {
        let previous = self.store.version.load();
        match previous {
            Some(ref seen) if *seen == descriptor.version => {
                info!("Version {} unchanged", descriptor.version);
                Ok(BroadcastOutcome::Unchanged)
            }
            None => {
                self.store.version.save(&descriptor.version)?;
                info!("First start at version {}, recorded without broadcast", descriptor.version);
                Ok(BroadcastOutcome::FirstInstall)
            }
            Some(previous) => {
                self.store.version.save(&descriptor.version)?;
                let recipients = self.store.subscribers.list_ids();
                info!(
                    "Version changed {} -> {}, notifying {} subscriber(s)",
                    previous,
                    descriptor.version,
                    recipients.len()
                );
                let note = format_change_note(descriptor);
                let mut delivery = DeliveryReport::default();
                delivery.extend(self.fanout.deliver_chat(&note, &recipients).await);
                if !delivery.all_succeeded() {
                    warn!(
                        "Change note reached {} of {} subscriber(s)",
                        delivery.tally().fully_delivered,
                        recipients.len()
                    );
                }
                Ok(BroadcastOutcome::Broadcast { previous, delivery })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_note_lists_escaped_notes() {
        let descriptor = VersionDescriptor {
            version: "1.1.0".to_string(),
            date: "2025-03-01".to_string(),
            notes: vec!["Faster previews".to_string(), "Fix <b> in titles".to_string()],
        };
        let note = format_change_note(&descriptor);
        assert!(note.starts_with("<b>Updated to v1.1.0</b> (2025-03-01)"));
        assert!(note.contains("• Faster previews"));
        assert!(note.contains("• Fix &lt;b&gt; in titles"));
    }

    #[test]
    fn descriptor_requires_version() {
        let dir = std::env::temp_dir().join(format!("weekly-digest-version-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("version.json");
        std::fs::write(&path, r#"{"version": "  ", "notes": []}"#).unwrap();
        assert!(matches!(load_descriptor(&path), Err(DigestError::Config(_))));
        std::fs::write(&path, r#"{"version": "2.0.0"}"#).unwrap();
        assert_eq!(load_descriptor(&path).unwrap().version, "2.0.0");
        std::fs::remove_dir_all(&dir).ok();
    }
}
