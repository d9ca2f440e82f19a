use crate::transport::MailerError;
use thiserror::Error;

/// Why one delivery attempt failed.
///
/// Store failures never show up here: suppression lookups fail open,
/// template lookups fall back to inline content, and audit writes are
/// best-effort, so the only ways an attempt itself fails are a missing
/// recipient or the transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Job has no recipient address")]
    MissingRecipient,
    #[error(transparent)]
    Mailer(#[from] MailerError),
}

impl DeliveryError {
    /// Every attempt failure is retried the same way, recipient validation
    /// included: a job missing its address will fail identically on each
    /// attempt until the cap dead-letters it. Kept deliberately to match the
    /// documented queue behaviour.
    pub fn is_retryable(&self) -> bool {
        true
    }
}
