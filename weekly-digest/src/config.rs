//! Process configuration, read once from the environment at startup and
//! handed to every component by value or reference. Nothing else in the crate
//! reads environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveTime, Weekday};

use crate::scheduler::WeeklySlot;
use crate::types::{DigestError, FetchConfig, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub telegram: TelegramConfig,
    pub generator: GeneratorConfig,
    pub schedule: ScheduleConfig,
    pub dedup: DedupConfig,
    pub email: Option<EmailConfig>,
    pub fetch: FetchConfig,
    pub version_file: PathBuf,
    pub audit_keyword: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Used by `run-now` when the subscriber registry is empty.
    pub fallback_chat_ids: Vec<String>,
    pub chunk_limit: usize,
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Anthropic,
    Baseline,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Zero, one or two weekly digest slots.
    pub slots: Vec<WeeklySlot>,
    pub maintenance_day: u32,
    pub maintenance_time: NaiveTime,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Number of leading title characters compared against history.
    pub prefix_len: usize,
    pub history_cap: usize,
    /// How many historical titles are passed to the generator as hints.
    pub hint_sample: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            prefix_len: 10,
            history_cap: 80,
            hint_sample: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
    pub recipients: Vec<String>,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub subject_prefix: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".to_string()));

        let telegram = TelegramConfig {
            bot_token: get("TELEGRAM_BOT_TOKEN"),
            fallback_chat_ids: split_list(get("TELEGRAM_CHAT_ID").as_deref()),
            chunk_limit: parse_or(get("CHAT_CHUNK_LIMIT"), "CHAT_CHUNK_LIMIT", 4000)?,
            poll_timeout_secs: parse_or(get("TELEGRAM_POLL_TIMEOUT_SECS"), "TELEGRAM_POLL_TIMEOUT_SECS", 30)?,
        };
        if telegram.chunk_limit == 0 {
            return Err(DigestError::Config("CHAT_CHUNK_LIMIT must be positive".to_string()));
        }

        let kind = match get("GENERATOR").map(|v| v.to_lowercase()).as_deref() {
            None | Some("anthropic") => GeneratorKind::Anthropic,
            Some("baseline") => GeneratorKind::Baseline,
            Some(other) => {
                return Err(DigestError::Config(format!(
                    "GENERATOR must be 'anthropic' or 'baseline', got '{}'",
                    other
                )))
            }
        };
        let generator = GeneratorConfig {
            kind,
            api_key: get("ANTHROPIC_API_KEY"),
            model: get("CLAUDE_MODEL").unwrap_or_else(|| "claude-haiku-4-5-20251001".to_string()),
            max_tokens: parse_or(get("GENERATION_MAX_TOKENS"), "GENERATION_MAX_TOKENS", 3500)?,
            timeout_secs: parse_or(get("GENERATION_TIMEOUT_SECS"), "GENERATION_TIMEOUT_SECS", 120)?,
        };
        if generator.timeout_secs == 0 {
            return Err(DigestError::Config("GENERATION_TIMEOUT_SECS must be positive".to_string()));
        }

        let mut slots = vec![parse_slot(
            get("SCHEDULE_DAY").as_deref().unwrap_or("monday"),
            get("SCHEDULE_TIME").as_deref().unwrap_or("08:00"),
        )?];
        match (get("SCHEDULE_DAY_2"), get("SCHEDULE_TIME_2")) {
            (Some(day), time) => slots.push(parse_slot(&day, time.as_deref().unwrap_or("08:00"))?),
            (None, Some(_)) => {
                return Err(DigestError::Config(
                    "SCHEDULE_TIME_2 is set but SCHEDULE_DAY_2 is missing".to_string(),
                ))
            }
            (None, None) => {}
        }
        let disabled = get("SCHEDULE_DISABLED")
            .map(|v| parse_bool(&v, "SCHEDULE_DISABLED"))
            .transpose()?
            .unwrap_or(false);
        if disabled {
            slots.clear();
        }

        let maintenance_day: u32 = parse_or(get("MAINTENANCE_DAY"), "MAINTENANCE_DAY", 1)?;
        if !(1..=28).contains(&maintenance_day) {
            return Err(DigestError::Config(format!(
                "MAINTENANCE_DAY must be between 1 and 28, got {}",
                maintenance_day
            )));
        }
        let schedule = ScheduleConfig {
            slots,
            maintenance_day,
            maintenance_time: parse_time(get("MAINTENANCE_TIME").as_deref().unwrap_or("03:00"))?,
            poll_interval_secs: parse_or(get("SCHEDULER_POLL_SECS"), "SCHEDULER_POLL_SECS", 30)?,
        };
        if schedule.poll_interval_secs == 0 {
            return Err(DigestError::Config("SCHEDULER_POLL_SECS must be positive".to_string()));
        }

        let defaults = DedupConfig::default();
        let dedup = DedupConfig {
            prefix_len: parse_or(get("DEDUP_PREFIX_LEN"), "DEDUP_PREFIX_LEN", defaults.prefix_len)?,
            history_cap: parse_or(get("DEDUP_HISTORY_CAP"), "DEDUP_HISTORY_CAP", defaults.history_cap)?,
            hint_sample: parse_or(get("DEDUP_HINT_SAMPLE"), "DEDUP_HINT_SAMPLE", defaults.hint_sample)?,
        };

        let email = match (
            get("EMAIL_HOST"),
            get("EMAIL_USER"),
            get("EMAIL_PASSWORD"),
            get("EMAIL_FROM"),
            get("EMAIL_RECIPIENTS"),
        ) {
            (Some(host), Some(user), Some(password), Some(from), Some(recipients)) => Some(EmailConfig {
                host,
                port: parse_or(get("EMAIL_PORT"), "EMAIL_PORT", 587)?,
                user,
                password,
                from,
                recipients: split_list(Some(&recipients)),
                use_tls: get("EMAIL_USE_TLS").map(|v| parse_bool(&v, "EMAIL_USE_TLS")).transpose()?.unwrap_or(true),
                use_ssl: get("EMAIL_USE_SSL").map(|v| parse_bool(&v, "EMAIL_USE_SSL")).transpose()?.unwrap_or(false),
                subject_prefix: get("EMAIL_SUBJECT_PREFIX").unwrap_or_else(|| "[AI Weekly] ".to_string()),
            }),
            _ => None,
        };

        let fetch = FetchConfig {
            timeout_seconds: parse_or(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS", 25)?,
            ..FetchConfig::default()
        };

        Ok(Self {
            data_dir,
            telegram,
            generator,
            schedule,
            dedup,
            email,
            fetch,
            version_file: PathBuf::from(get("VERSION_FILE").unwrap_or_else(|| "./version.json".to_string())),
            audit_keyword: get("AUDIT_KEYWORD"),
        })
    }

    /// Checks the credentials every delivering entry point needs.
    pub fn require_delivery_credentials(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.telegram.bot_token.is_none() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.generator.kind == GeneratorKind::Anthropic && self.generator.api_key.is_none() {
            missing.push("ANTHROPIC_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DigestError::Config(format!("missing required settings: {}", missing.join(", "))))
        }
    }
}

pub fn parse_slot(day: &str, time: &str) -> Result<WeeklySlot> {
    let weekday = Weekday::from_str(day.trim())
        .map_err(|_| DigestError::Config(format!("invalid weekday '{}'", day)))?;
    Ok(WeeklySlot::new(weekday, parse_time(time)?))
}

pub fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| DigestError::Config(format!("invalid time '{}', expected HH:MM", value)))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| DigestError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DigestError::Config(format!("{} must be true or false, got '{}'", key, value))),
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or("")
        .split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}
