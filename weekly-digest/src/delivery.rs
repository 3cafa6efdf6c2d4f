//! Fan-out of one finished report to many recipients.
//!
//! Every send attempt yields a `DeliveryOutcome`; nothing here returns an
//! error for a failed recipient. Callers read the aggregate through
//! `DeliveryReport`.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::types::{Channel, ChatTransport, DeliveryOutcome, EmailTransport};

/// Splits `text` into the fewest contiguous chunks of at most `limit`
/// characters, breaking only after a newline.
///
/// Chunks keep their line terminators, so concatenating them reproduces
/// `text` exactly. A single line longer than `limit` cannot be kept whole and
/// is cut at character boundaries.
pub fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = line.chars().collect();
            let mut pieces = chars.chunks(limit).map(|piece| piece.iter().collect::<String>()).peekable();
            while let Some(piece) = pieces.next() {
                if pieces.peek().is_some() {
                    chunks.push(piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
            continue;
        }

        if current_len + line_len > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecipientTally {
    pub fully_delivered: usize,
    pub partially_delivered: usize,
    pub failed: usize,
}

impl RecipientTally {
    pub fn total(&self) -> usize {
        self.fully_delivered + self.partially_delivered + self.failed
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn extend(&mut self, outcomes: Vec<DeliveryOutcome>) {
        self.outcomes.extend(outcomes);
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.success)
    }

    /// Per-recipient view, a recipient being one id on one channel.
    pub fn tally(&self) -> RecipientTally {
        let mut per_recipient: HashMap<(Channel, &str), (usize, usize)> = HashMap::new();
        for outcome in &self.outcomes {
            let entry = per_recipient
                .entry((outcome.channel, outcome.recipient_id.as_str()))
                .or_default();
            entry.1 += 1;
            if outcome.success {
                entry.0 += 1;
            }
        }

        let mut tally = RecipientTally::default();
        for (ok, total) in per_recipient.values() {
            match (*ok, *total) {
                (ok, total) if ok == total => tally.fully_delivered += 1,
                (0, _) => tally.failed += 1,
                _ => tally.partially_delivered += 1,
            }
        }
        tally
    }

    pub fn failed_recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.outcomes
            .iter()
            .filter(|o| !o.success)
            .filter(|o| seen.insert((o.channel, o.recipient_id.clone())))
            .map(|o| o.recipient_id.clone())
            .collect()
    }
}

/// Rendered email ready for the SMTP transport.
#[derive(Debug, Clone)]
pub struct EmailPayload {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub plain_body: String,
}

#[derive(Clone)]
pub struct DeliveryFanout {
    chat: Arc<dyn ChatTransport>,
    email: Option<Arc<dyn EmailTransport>>,
}

impl DeliveryFanout {
    pub fn new(chat: Arc<dyn ChatTransport>, email: Option<Arc<dyn EmailTransport>>) -> Self {
        Self { chat, email }
    }

    pub fn has_email(&self) -> bool {
        self.email.is_some()
    }

    /// Sends `report` to every recipient, chunk by chunk and in order.
    /// A failed chunk never stops later chunks or later recipients.
    pub async fn deliver_chat(&self, report: &str, recipients: &[String]) -> Vec<DeliveryOutcome> {
        let chunks = split_chunks(report, self.chat.max_chunk_len());
        let mut seen = HashSet::new();
        let mut outcomes = Vec::new();

        for recipient in recipients {
            if !seen.insert(recipient.as_str()) {
                continue;
            }
            let mut delivered = 0;
            for (index, chunk) in chunks.iter().enumerate() {
                let outcome = match self.chat.send_chunk(recipient, chunk).await {
                    Ok(receipt) => {
                        debug!(
                            "Chunk {}/{} to {} sent (message {:?})",
                            index + 1,
                            chunks.len(),
                            recipient,
                            receipt.message_id
                        );
                        delivered += 1;
                        DeliveryOutcome {
                            recipient_id: recipient.clone(),
                            channel: Channel::Chat,
                            chunk_index: index,
                            success: true,
                            error_detail: None,
                        }
                    }
                    Err(e) => {
                        warn!("Chunk {}/{} to {} failed: {}", index + 1, chunks.len(), recipient, e);
                        DeliveryOutcome {
                            recipient_id: recipient.clone(),
                            channel: Channel::Chat,
                            chunk_index: index,
                            success: false,
                            error_detail: Some(e.to_string()),
                        }
                    }
                };
                outcomes.push(outcome);
            }
            info!("Delivered {}/{} chunk(s) to {}", delivered, chunks.len(), recipient);
        }
        outcomes
    }

    /// One transmission naming every recipient; each recipient shares the
    /// transmission's outcome. Yields nothing when email is not configured.
    pub async fn deliver_email(&self, payload: &EmailPayload) -> Vec<DeliveryOutcome> {
        let Some(email) = &self.email else {
            return Vec::new();
        };
        if payload.recipients.is_empty() {
            return Vec::new();
        }

        let result = email
            .send_bulk(&payload.recipients, &payload.subject, &payload.html_body, &payload.plain_body)
            .await;
        let error_detail = match &result {
            Ok(()) => {
                info!("Email sent to {} recipient(s)", payload.recipients.len());
                None
            }
            Err(e) => {
                warn!("Email to {} recipient(s) failed: {}", payload.recipients.len(), e);
                Some(e.to_string())
            }
        };

        payload
            .recipients
            .iter()
            .map(|recipient| DeliveryOutcome {
                recipient_id: recipient.clone(),
                channel: Channel::Email,
                chunk_index: 0,
                success: error_detail.is_none(),
                error_detail: error_detail.clone(),
            })
            .collect()
    }
}
