//! Suppression list lookup.

use crate::entity::email_unsubscribe;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// Whether `email` is on the suppression list.
///
/// Persistence errors fail open: a transient store error must never silently
/// block legitimate delivery, so the lookup answers "not suppressed" and the
/// failure is surfaced on the diagnostic channel instead. The trade-off is
/// that a suppressed address could receive mail during a store outage.
#[tracing::instrument(skip(db))]
pub async fn is_suppressed(db: &DatabaseConnection, email: &str) -> bool {
    match email_unsubscribe::Entity::find()
        .filter(email_unsubscribe::Column::Email.eq(email))
        .one(db)
        .await
    {
        Ok(entry) => entry.is_some(),
        Err(e) => {
            tracing::warn!(
                name = "suppression.lookup_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Suppression lookup failed; failing open"
            );
            false
        }
    }
}
