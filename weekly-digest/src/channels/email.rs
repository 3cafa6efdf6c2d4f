//! SMTP delivery of the weekly report and the chat-HTML to email conversion.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use tracing::info;

use crate::config::EmailConfig;
use crate::delivery::EmailPayload;
use crate::types::{DigestError, EmailTransport, Result};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex should compile"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<b>(.*?)</b>").expect("bold regex should compile"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<i>(.*?)</i>").expect("italic regex should compile"));

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| DigestError::Config(format!("invalid EMAIL_FROM '{}': {}", config.from, e)))?;

        let relay = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host))
        };
        let builder = relay.map_err(|e| DigestError::Config(format!("SMTP relay {}: {}", config.host, e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.user.clone(), config.password.clone()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send_bulk(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
        plain_body: &str,
    ) -> anyhow::Result<()> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in recipients {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| DigestError::Email(format!("invalid recipient '{}': {}", recipient, e)))?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(plain_body.to_string(), html_body.to_string()))
            .map_err(|e| DigestError::Email(format!("build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DigestError::Email(format!("SMTP send: {}", e)))?;
        info!("SMTP accepted message for {} recipient(s)", recipients.len());
        Ok(())
    }
}

/// Removes markup and decodes the entities the chat format escapes.
pub fn strip_tags(report: &str) -> String {
    TAG_RE
        .replace_all(report, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn line_to_html(line: &str) -> String {
    let line = BOLD_RE.replace_all(line, "<strong>$1</strong>");
    ITALIC_RE.replace_all(&line, "<em>$1</em>").into_owned()
}

pub fn report_to_html(report: &str, date: NaiveDate) -> String {
    let mut body = String::new();
    for line in report.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.chars().all(|c| c == '─' || c == '-') {
            body.push_str("<hr>\n");
            continue;
        }
        let class = if line.starts_with("  ") { "item sub" } else { "item" };
        body.push_str(&format!("<p class=\"{}\">{}</p>\n", class, line_to_html(trimmed)));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  body {{ font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; background: #f4f5f7; margin: 0; padding: 24px; }}
  .card {{ max-width: 720px; margin: 0 auto; background: #ffffff; border-radius: 8px; padding: 24px 32px; }}
  .header {{ background: linear-gradient(135deg, #1e3a8a, #6d28d9); color: #ffffff; border-radius: 8px 8px 0 0; margin: -24px -32px 24px; padding: 24px 32px; }}
  .item {{ line-height: 1.6; margin: 6px 0; }}
  .sub {{ margin-left: 20px; color: #374151; }}
  .footer {{ color: #9ca3af; font-size: 12px; margin-top: 32px; }}
  a {{ color: #2563eb; }}
</style>
</head>
<body>
<div class="card">
<div class="header"><h2>Weekly AI Report</h2><div>{date}</div></div>
{body}<div class="footer">Sent automatically by the weekly digest bot.</div>
</div>
</body>
</html>
"#,
        date = date.format("%Y/%m/%d"),
        body = body,
    )
}

/// Builds the subject and both bodies for one outbound email.
pub fn render_email(report: &str, subject_prefix: &str, date: NaiveDate, recipients: &[String]) -> EmailPayload {
    EmailPayload {
        recipients: recipients.to_vec(),
        subject: format!("{}{} weekly AI report", subject_prefix, date.format("%Y/%m/%d")),
        html_body: report_to_html(report, date),
        plain_body: strip_tags(report),
    }
}
