//! Asynchronous email delivery: a durable job queue plus the worker that
//! drains it.
//!
//! Jobs are submitted in batches, persisted in the relational store, and
//! consumed by a pool of worker loops. Each attempt resolves content against
//! stored templates or inline data, checks the suppression list, delivers
//! over SMTP, and records exactly one audit row — at-least-once delivery,
//! with the delivery log as the source of truth per attempt.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::transport::Mailer;

pub mod audit;
pub mod config;
pub mod enqueue;
pub mod entity;
pub mod error;
pub mod job;
pub mod queue;
pub mod render;
pub mod suppression;
pub mod transport;
pub mod worker;

/// Shared, explicitly constructed collaborators owned for process lifetime.
///
/// The mailer is `None` when no SMTP transport is configured; the worker
/// then records `logged` outcomes without sending.
#[derive(Clone)]
pub struct AppResources {
    pub db: Arc<DatabaseConnection>,
    pub mailer: Option<Arc<dyn Mailer>>,
    pub config: Arc<AppConfig>,
}
