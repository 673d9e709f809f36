// src/services/notify.rs

//! Failure notifications.
//!
//! A notifier is called once when a commit exhausts its retries. Delivery
//! problems are logged and never propagate back into the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(feature = "mail")]
use crate::error::{AppError, Result};
#[cfg(feature = "mail")]
use crate::models::MailConfig;

const SUBJECT: &str = "ADSB Logger: Database Operation FAILED";

/// Details of a commit that could not be completed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub error: String,
    pub attempts: u32,
    /// Summaries still held in the cache
    pub pending: usize,
    pub occurred_at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(error: impl Into<String>, attempts: u32, pending: usize) -> Self {
        Self {
            error: error.into(),
            attempts,
            pending,
            occurred_at: Utc::now(),
        }
    }

    pub fn subject(&self) -> &'static str {
        SUBJECT
    }

    pub fn text_body(&self) -> String {
        format!(
            "The ADSB logger failed a database operation after {} attempts.\n\
             {} aircraft summaries remain cached and will be retried.\n\
             Time: {}\n\nError details:\n{}",
            self.attempts,
            self.pending,
            self.occurred_at.to_rfc3339(),
            self.error
        )
    }

    pub fn html_body(&self) -> String {
        format!(
            "<html><body>\
             <h2>ADSB Logger: Database Operation Failure</h2>\
             <p>The commit failed after {} attempts; {} aircraft summaries remain cached. \
             Please check the server and logger logs.</p>\
             <p>Time: {}</p>\
             <h3>Error Details:</h3>\
             <pre style=\"background-color:#f0f0f0; border:1px solid #ddd; padding:10px;\">\
             <code>{}</code></pre>\
             </body></html>",
            self.attempts,
            self.pending,
            self.occurred_at.to_rfc3339(),
            escape_html(&self.error)
        )
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Receiver of terminal commit failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &FailureReport);
}

/// Notifier that only writes the report to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &FailureReport) {
        log::error!("{}: {}", report.subject(), report.text_body());
    }
}

/// Notifier that mails the report over SMTPS.
#[cfg(feature = "mail")]
#[derive(Debug, Clone)]
pub struct MailNotifier {
    config: MailConfig,
}

#[cfg(feature = "mail")]
impl MailNotifier {
    /// Build a mail notifier, or `None` when mail is not configured.
    pub fn from_config(config: &MailConfig) -> Option<Self> {
        if !config.is_configured() {
            log::warn!("Email not configured, failure notifications go to the log only");
            return None;
        }
        Some(Self {
            config: config.clone(),
        })
    }

    async fn send(&self, report: &FailureReport) -> Result<()> {
        use lettre::message::{Mailbox, MultiPart};
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let from: Mailbox = self.config.sender.parse().map_err(AppError::notify)?;
        let to: Mailbox = self.config.recipient.parse().map_err(AppError::notify)?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(report.subject())
            .multipart(MultiPart::alternative_plain_html(
                report.text_body(),
                report.html_body(),
            ))
            .map_err(AppError::notify)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_server)
            .map_err(AppError::notify)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.sender.clone(),
                self.config.password.clone(),
            ))
            .build();

        mailer.send(message).await.map_err(AppError::notify)?;
        Ok(())
    }
}

#[cfg(feature = "mail")]
#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, report: &FailureReport) {
        match self.send(report).await {
            Ok(()) => log::info!("Sent failure notification to {}", self.config.recipient),
            Err(e) => log::error!("Failed to send failure notification: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bodies_carry_details() {
        let report = FailureReport::new("Lock wait timeout <table>", 4, 17);

        let text = report.text_body();
        assert!(text.contains("after 4 attempts"));
        assert!(text.contains("17 aircraft summaries"));
        assert!(text.contains("Lock wait timeout <table>"));

        let html = report.html_body();
        assert!(html.contains("Lock wait timeout &lt;table&gt;"));
        assert!(!html.contains("<table>"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"a & "b""#), "a &amp; &quot;b&quot;");
        assert_eq!(escape_html("table 'x' <missing>"), "table &#39;x&#39; &lt;missing&gt;");
    }

    #[tokio::test]
    async fn test_log_notifier_does_not_fail() {
        LogNotifier.notify(&FailureReport::new("boom", 1, 0)).await;
    }

    #[cfg(feature = "mail")]
    #[test]
    fn test_mail_notifier_requires_configuration() {
        assert!(MailNotifier::from_config(&MailConfig::default()).is_none());

        let config = MailConfig {
            smtp_server: "smtp.example.com".to_string(),
            sender: "logger@example.com".to_string(),
            password: "secret".to_string(),
            recipient: "ops@example.com".to_string(),
            ..MailConfig::default()
        };
        assert!(MailNotifier::from_config(&config).is_some());
    }
}
