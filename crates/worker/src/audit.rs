//! Delivery log: one append-only row per attempt outcome.

use crate::entity::email_log;
use crate::job::DeliveryStatus;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, DatabaseConnection};
use time::OffsetDateTime;

/// Record one attempt outcome.
///
/// Best-effort audit, never block on audit: an insert failure is reported on
/// the diagnostic channel but not propagated, so the worker can still report
/// the attempt's outcome to the queue. Callers must invoke this *before*
/// acknowledging the outcome (log-then-ack), so a crash between the two
/// never hides a recorded attempt behind a still-pending job.
#[tracing::instrument(skip(db, provider_response))]
pub async fn record(
    db: &DatabaseConnection,
    to_email: &str,
    template_id: Option<&str>,
    status: DeliveryStatus,
    provider_response: Option<&str>,
) {
    let entry = email_log::ActiveModel {
        id: NotSet,
        to_email: Set(to_email.to_owned()),
        template_id: Set(template_id.map(str::to_owned)),
        status: Set(status.as_str().to_owned()),
        provider_response: Set(provider_response.map(str::to_owned)),
        created_at: Set(OffsetDateTime::now_utc()),
    };

    if let Err(e) = entry.insert(db).await {
        tracing::error!(
            name = "audit.record_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            error = %e,
            to_email = %to_email,
            status = status.as_str(),
            message = "Failed to write delivery log entry"
        );
    }
}
