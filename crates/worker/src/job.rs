//! The unit of work: one requested email send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One requested email send, as submitted by the enqueuer.
///
/// Nothing is validated at submission time; the recipient check happens
/// inside the worker, at dequeue (so a bad job burns its attempts there).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    /// Recipient address. Required at dequeue; a job without it fails fast.
    #[serde(default)]
    pub to: Option<String>,
    /// Stored template reference. When present and the row exists, it takes
    /// precedence over the inline `subject`/`body`.
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Variable bag for placeholder substitution. Arbitrarily nested.
    #[serde(default)]
    pub variables: Value,
    /// Provenance tag, passed through unchanged and never interpreted.
    #[serde(default)]
    pub created_by: Option<String>,
    /// Per-job override of the delivery attempts cap.
    #[serde(default)]
    pub attempts: Option<u32>,
}

impl EmailJob {
    /// A job addressed to `to` with inline content and otherwise defaults.
    pub fn to_address(to: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            template_id: None,
            subject: None,
            body: None,
            variables: Value::Null,
            created_by: None,
            attempts: None,
        }
    }
}

/// Terminal outcome of one delivery attempt, as recorded in the audit log.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The transport accepted the message.
    Sent,
    /// The recipient is on the suppression list; nothing was sent.
    Suppressed,
    /// No transport is configured; content was computed but not sent.
    Logged,
    /// The attempt failed (validation or transport).
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Suppressed => "suppressed",
            DeliveryStatus::Logged => "logged",
            DeliveryStatus::Error => "error",
        }
    }
}
