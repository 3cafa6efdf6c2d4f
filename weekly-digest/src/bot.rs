//! Chat command front-end: long-polls Telegram and maps commands onto the
//! subscriber registry and the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::channels::telegram::{escape_html, TelegramChannel, TelegramMessage};
use crate::orchestrator::{Orchestrator, Trigger};
use crate::scheduler::WeeklySlot;
use crate::store::Store;
use crate::types::{Result, SubscriberMeta};

const COMMAND_HELP: &str = "<b>Commands</b>\n\
  /subscribe - receive the weekly AI report\n\
  /unsubscribe - stop receiving it\n\
  /status - subscription status and subscriber count\n\
  /preview - get the latest report now";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    Status,
    Preview,
}

/// Parses `/name`, `/name@BotName` and `/name args`. Unknown commands and
/// plain text yield `None`.
pub fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    match name.to_lowercase().as_str() {
        "start" => Some(Command::Start),
        "subscribe" => Some(Command::Subscribe),
        "unsubscribe" => Some(Command::Unsubscribe),
        "status" => Some(Command::Status),
        "preview" => Some(Command::Preview),
        _ => None,
    }
}

/// Front-end view of one chat message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: String,
    pub chat_title: Option<String>,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
    pub username: Option<String>,
    pub text: String,
}

impl IncomingMessage {
    pub fn from_telegram(message: &TelegramMessage) -> Option<Self> {
        let text = message.text.clone()?;
        let from = message.from.as_ref();
        if from.is_some_and(|u| u.is_bot) {
            return None;
        }
        Some(Self {
            chat_id: message.chat.id.to_string(),
            chat_title: message.chat.title.clone(),
            sender_id: from.map(|u| u.id),
            sender_name: from.map(|u| u.display_name()),
            username: from.and_then(|u| u.username.clone()),
            text,
        })
    }

    fn speaker(&self) -> String {
        match (&self.username, &self.sender_name) {
            (Some(username), _) => format!("@{}", username),
            (None, Some(name)) => name.clone(),
            (None, None) => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Response {
    pub replies: Vec<String>,
    /// Start a manual run for this chat once the replies are out.
    pub preview: bool,
}

impl Response {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![text.into()],
            preview: false,
        }
    }
}

pub struct CommandHandler {
    store: Arc<Store>,
    audit: Option<Arc<AuditLog>>,
    schedule: String,
}

impl CommandHandler {
    pub fn new(store: Arc<Store>, audit: Option<Arc<AuditLog>>, slots: &[WeeklySlot]) -> Self {
        let schedule = if slots.is_empty() {
            "not scheduled".to_string()
        } else {
            slots.iter().map(|s| format!("every {}", s)).collect::<Vec<_>>().join(" and ")
        };
        Self { store, audit, schedule }
    }

    pub fn handle(&self, message: &IncomingMessage) -> Result<Response> {
        let Some(command) = parse_command(&message.text) else {
            return self.handle_text(message);
        };
        let meta = SubscriberMeta {
            display_name: message.sender_name.clone(),
            username: message.username.clone(),
        };
        let name = escape_html(message.sender_name.as_deref().unwrap_or("there"));

        let response = match command {
            Command::Start => {
                if self.store.subscribers.subscribe(&message.chat_id, meta)? {
                    info!("New subscriber {} ({})", message.chat_id, message.speaker());
                    Response::reply(format!(
                        "<b>Hi {}, welcome to the weekly AI report!</b>\n\n\
                         You are now subscribed and will receive the report {}.\n\n{}",
                        name, self.schedule, COMMAND_HELP
                    ))
                } else {
                    Response::reply(format!(
                        "<b>Hi {}!</b> You are already subscribed.\n\n{}\n\nDelivery: {}",
                        name, COMMAND_HELP, self.schedule
                    ))
                }
            }
            Command::Subscribe => {
                if self.store.subscribers.subscribe(&message.chat_id, meta)? {
                    info!("Subscribed {} ({})", message.chat_id, message.speaker());
                    Response::reply(format!(
                        "<b>Subscribed.</b> The report arrives {}.\nSend /unsubscribe to stop.",
                        self.schedule
                    ))
                } else {
                    Response::reply("You are already subscribed. Send /unsubscribe to stop.")
                }
            }
            Command::Unsubscribe => {
                if self.store.subscribers.unsubscribe(&message.chat_id)? {
                    info!("Unsubscribed {} ({})", message.chat_id, message.speaker());
                    Response::reply("Unsubscribed. Send /subscribe to start again.")
                } else {
                    Response::reply("You are not subscribed. Send /subscribe to start.")
                }
            }
            Command::Status => {
                let subscribed = self.store.subscribers.is_subscribed(&message.chat_id);
                Response::reply(format!(
                    "<b>Status:</b> {}\n<b>Delivery:</b> {}\n<b>Subscribers:</b> {}",
                    if subscribed { "subscribed" } else { "not subscribed" },
                    self.schedule,
                    self.store.subscribers.count()
                ))
            }
            Command::Preview => {
                if self.store.subscribers.is_subscribed(&message.chat_id) {
                    Response {
                        replies: vec!["Preparing this week's report, this can take up to a minute...".to_string()],
                        preview: true,
                    }
                } else {
                    Response::reply("Please /subscribe before requesting a preview.")
                }
            }
        };
        Ok(response)
    }

    fn handle_text(&self, message: &IncomingMessage) -> Result<Response> {
        let Some(audit) = &self.audit else {
            return Ok(Response::default());
        };
        if !audit.matches(&message.text) {
            return Ok(Response::default());
        }

        let entry = AuditEntry::now(
            message.chat_title.clone().unwrap_or_else(|| "private chat".to_string()),
            message.speaker(),
            message.text.clone(),
        );
        audit.record(&entry)?;
        info!("Audit entry from {} in {}", entry.speaker, entry.chat_title);
        Ok(Response::reply(format!(
            "<b>Message recorded</b>\n\nTime: {}\nSpeaker: {}\nText: {}",
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            escape_html(&entry.speaker),
            escape_html(&entry.text)
        )))
    }
}

pub struct BotFrontend {
    telegram: Arc<TelegramChannel>,
    handler: CommandHandler,
    orchestrator: Arc<Orchestrator>,
}

impl BotFrontend {
    pub fn new(telegram: Arc<TelegramChannel>, handler: CommandHandler, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            telegram,
            handler,
            orchestrator,
        }
    }

    pub async fn run_forever(self) {
        info!("Bot front-end polling for updates");
        loop {
            let updates = match self.telegram.get_updates().await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("getUpdates failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };
            for update in updates {
                if let Some(message) = update.message.as_ref().and_then(IncomingMessage::from_telegram) {
                    self.dispatch(&message).await;
                }
            }
        }
    }

    async fn dispatch(&self, message: &IncomingMessage) {
        let response = match self.handler.handle(message) {
            Ok(response) => response,
            Err(e) => {
                error!("Handling message from {} failed: {}", message.chat_id, e);
                return;
            }
        };

        for reply in &response.replies {
            if let Err(e) = self.telegram.send_message(&message.chat_id, reply).await {
                warn!("Reply to {} failed: {}", message.chat_id, e);
            }
        }

        if response.preview {
            let chat_id = message.chat_id.clone();
            let handle = self.orchestrator.spawn_run(Trigger::Manual(chat_id.clone()));
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(summary)) => info!("Preview for {} finished {:?}", chat_id, summary.status),
                    Ok(Err(e)) => warn!("Preview for {} failed: {}", chat_id, e),
                    Err(e) => error!("Preview task for {} panicked: {}", chat_id, e),
                }
            });
        }
    }
}
