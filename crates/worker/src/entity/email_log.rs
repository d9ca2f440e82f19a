//! Append-only audit trail of delivery attempts.
//!
//! One row per attempt that reaches the worker body, never per enqueue:
//! a job retried twice leaves three rows. Rows are never updated or
//! deleted by this subsystem; reads are an external reporting concern.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "email_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub to_email: String,
    pub template_id: Option<String>,
    pub status: String, // "sent", "suppressed", "logged" or "error"
    pub provider_response: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
