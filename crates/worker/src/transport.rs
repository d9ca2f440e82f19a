//! SMTP transport seam.
//!
//! The worker only ever talks to a [`Mailer`], so tests can inject an
//! in-memory fake and the SMTP client stays an explicitly constructed
//! collaborator instead of process-wide state.

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;

/// One outgoing message, exactly what the transport boundary consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Invalid mailbox address: {0}")]
    Address(String),
    #[error("SMTP send failed: {0}")]
    Smtp(String),
}

/// Sends one message, returning the raw provider response as text.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Outgoing) -> Result<String, MailerError>;
}

/// Submission timeout; an SMTP round trip slower than this counts as a
/// transport failure like any other.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Lettre-backed SMTP mailer.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self, MailerError> {
        let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
        let builder = if cfg.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)
        }
        .map_err(|e| MailerError::Smtp(e.to_string()))?;
        Ok(Self {
            transport: builder
                .port(cfg.port)
                .credentials(creds)
                .timeout(Some(SEND_TIMEOUT))
                .build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: Outgoing) -> Result<String, MailerError> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| MailerError::Address(format!("from '{}': {e}", mail.from)))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| MailerError::Address(format!("to '{}': {e}", mail.to)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject)
            .header(header::MIME_VERSION_1_0)
            .header(header::ContentType::TEXT_HTML)
            .message_id(None)
            .body(mail.html)
            .map_err(|e| MailerError::Smtp(e.to_string()))?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailerError::Smtp(e.to_string()))?;

        let detail: Vec<&str> = response.message().collect();
        Ok(format!("{} {}", response.code(), detail.join(" ")))
    }
}
