//! Durable queue row backing one email job.
//!
//! The job payload lives in `payload` as JSON; the remaining columns are
//! scheduling state owned by [`crate::queue`]. Rows stay around after a
//! terminal outcome until retention pruning evicts them.

use sea_orm::entity::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "email_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub queue: String,
    pub payload: Json,
    pub status: String, // "pending", "in_flight", "completed" or "dead"
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub available_at: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
