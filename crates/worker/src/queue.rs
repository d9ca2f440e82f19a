//! Durable job queue backed by the `email_jobs` table.
//!
//! Jobs are plain rows: `pending` rows whose `available_at` has passed are
//! eligible, a guarded update flips them to `in_flight` so no two workers
//! ever claim the same row, and terminal rows stay around (as `completed` or
//! `dead`) until retention pruning evicts them. Because the rows live in the
//! relational store, an unacknowledged job survives a process restart and is
//! redelivered — delivery is at-least-once, never exactly-once, and the
//! worker pipeline is written so repeated delivery is safe.

use crate::config::QueueConfig;
use crate::entity::email_job;
use crate::job::EmailJob;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use std::time::Duration;
use time::OffsetDateTime;

/// Scheduling state of a queue row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    InFlight,
    Completed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InFlight => "in_flight",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }
}

/// A job handed to a worker: the row id, the 1-based attempt number this
/// delivery counts as, and the decoded payload.
#[derive(Clone, Debug)]
pub struct ClaimedJob {
    pub id: i32,
    pub attempt: i32,
    pub job: EmailJob,
}

/// Exponential backoff: the retry after failed attempt *n* waits
/// `base * 2^(n-1)`. The shift is capped so absurd attempt counts cannot
/// overflow.
pub fn backoff_delay(base: Duration, failed_attempt: u32) -> Duration {
    let exp = failed_attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exp)
}

/// Handle for one named logical queue. Holds scheduling policy only; the
/// database connection is passed per call so tests and the worker pool can
/// share one pool.
#[derive(Clone, Debug)]
pub struct JobQueue {
    name: String,
    retry_base: Duration,
    default_max_attempts: u32,
}

impl JobQueue {
    pub fn new(name: impl Into<String>, retry_base: Duration, default_max_attempts: u32) -> Self {
        Self {
            name: name.into(),
            retry_base,
            default_max_attempts,
        }
    }

    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self::new(
            cfg.name.clone(),
            Duration::from_secs(cfg.retry_base_secs),
            cfg.max_attempts,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist one job, immediately eligible for delivery.
    #[tracing::instrument(skip(self, db, job))]
    pub async fn submit(&self, db: &DatabaseConnection, job: &EmailJob) -> Result<i32, DbErr> {
        let now = OffsetDateTime::now_utc();
        let max_attempts = job.attempts.unwrap_or(self.default_max_attempts).max(1);
        let payload = serde_json::to_value(job)
            .map_err(|e| DbErr::Custom(format!("Failed to encode job payload: {e}")))?;
        let row = email_job::ActiveModel {
            id: NotSet,
            queue: Set(self.name.clone()),
            payload: Set(payload),
            status: Set(JobStatus::Pending.as_str().to_owned()),
            attempts_made: Set(0),
            max_attempts: Set(max_attempts as i32),
            available_at: Set(now),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let inserted = row.insert(db).await?;
        Ok(inserted.id)
    }

    /// Claim one eligible job, if any.
    ///
    /// Candidates are read oldest-eligible-first, but the actual claim is a
    /// guarded update filtered on `status = pending`: whichever worker's
    /// update lands first wins the row, the loser just moves on. The claim
    /// also burns the attempt counter, so a claim that never reports back
    /// (crash) still consumed an attempt once it is redelivered.
    pub async fn claim(&self, db: &DatabaseConnection) -> Result<Option<ClaimedJob>, DbErr> {
        let now = OffsetDateTime::now_utc();
        let candidates = email_job::Entity::find()
            .filter(email_job::Column::Queue.eq(&self.name))
            .filter(email_job::Column::Status.eq(JobStatus::Pending.as_str()))
            .filter(email_job::Column::AvailableAt.lte(now))
            .order_by_asc(email_job::Column::AvailableAt)
            .limit(8)
            .all(db)
            .await?;

        for row in candidates {
            let won = email_job::Entity::update_many()
                .col_expr(
                    email_job::Column::Status,
                    Expr::value(JobStatus::InFlight.as_str()),
                )
                .col_expr(
                    email_job::Column::AttemptsMade,
                    Expr::col(email_job::Column::AttemptsMade).add(1),
                )
                .col_expr(email_job::Column::UpdatedAt, Expr::value(now))
                .filter(email_job::Column::Id.eq(row.id))
                .filter(email_job::Column::Status.eq(JobStatus::Pending.as_str()))
                .filter(email_job::Column::AvailableAt.lte(now))
                .exec(db)
                .await?
                .rows_affected
                > 0;
            if !won {
                continue;
            }

            match serde_json::from_value::<EmailJob>(row.payload.clone()) {
                Ok(job) => {
                    return Ok(Some(ClaimedJob {
                        id: row.id,
                        attempt: row.attempts_made + 1,
                        job,
                    }));
                }
                Err(e) => {
                    // A payload we cannot decode will never become valid;
                    // dead-letter it instead of burning retries.
                    tracing::error!(
                        name = "queue.claim.bad_payload",
                        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                        job_id = row.id,
                        error = %e,
                        message = "Dead-lettering job with undecodable payload"
                    );
                    self.mark(db, row.id, JobStatus::Dead, Some(&format!("invalid payload: {e}")))
                        .await?;
                }
            }
        }
        Ok(None)
    }

    /// Acknowledge a claimed job as terminally done.
    pub async fn ack(&self, db: &DatabaseConnection, id: i32) -> Result<(), DbErr> {
        self.mark(db, id, JobStatus::Completed, None).await
    }

    /// Report a failed attempt. Schedules a backed-off retry while attempts
    /// remain, dead-letters the job otherwise. Returns the resulting status.
    #[tracing::instrument(skip(self, db, error))]
    pub async fn nack(
        &self,
        db: &DatabaseConnection,
        id: i32,
        error: &str,
    ) -> Result<JobStatus, DbErr> {
        let row = email_job::Entity::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("email job {id}")))?;

        let now = OffsetDateTime::now_utc();
        let exhausted = row.attempts_made >= row.max_attempts;
        let mut active: email_job::ActiveModel = row.clone().into();
        active.last_error = Set(Some(error.to_owned()));
        active.updated_at = Set(now);
        if exhausted {
            active.status = Set(JobStatus::Dead.as_str().to_owned());
        } else {
            let delay = backoff_delay(self.retry_base, row.attempts_made.max(1) as u32);
            active.status = Set(JobStatus::Pending.as_str().to_owned());
            active.available_at = Set(now + delay);
        }
        active.update(db).await?;
        Ok(if exhausted {
            JobStatus::Dead
        } else {
            JobStatus::Pending
        })
    }

    /// Return crashed deliveries to the queue: any `in_flight` row untouched
    /// for longer than `visibility_timeout` is made eligible again.
    pub async fn requeue_stale(
        &self,
        db: &DatabaseConnection,
        visibility_timeout: Duration,
    ) -> Result<u64, DbErr> {
        let now = OffsetDateTime::now_utc();
        let cutoff = now - visibility_timeout;
        let result = email_job::Entity::update_many()
            .col_expr(
                email_job::Column::Status,
                Expr::value(JobStatus::Pending.as_str()),
            )
            .col_expr(email_job::Column::AvailableAt, Expr::value(now))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(now))
            .filter(email_job::Column::Queue.eq(&self.name))
            .filter(email_job::Column::Status.eq(JobStatus::InFlight.as_str()))
            .filter(email_job::Column::UpdatedAt.lt(cutoff))
            .exec(db)
            .await?;
        if result.rows_affected > 0 {
            tracing::warn!(
                name = "queue.requeue_stale.redelivered",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                count = result.rows_affected,
                message = "Requeued stale in-flight jobs for redelivery"
            );
        }
        Ok(result.rows_affected)
    }

    /// Bound storage: keep at most `keep` completed/dead rows for this
    /// queue, evicting the oldest beyond that.
    pub async fn prune_finished(&self, db: &DatabaseConnection, keep: u64) -> Result<u64, DbErr> {
        let finished = email_job::Entity::find()
            .filter(email_job::Column::Queue.eq(&self.name))
            .filter(
                email_job::Column::Status
                    .is_in([JobStatus::Completed.as_str(), JobStatus::Dead.as_str()]),
            )
            .order_by_desc(email_job::Column::UpdatedAt)
            .all(db)
            .await?;
        if finished.len() as u64 <= keep {
            return Ok(0);
        }
        let doomed: Vec<i32> = finished
            .into_iter()
            .skip(keep as usize)
            .map(|row| row.id)
            .collect();
        let result = email_job::Entity::delete_many()
            .filter(email_job::Column::Id.is_in(doomed))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn mark(
        &self,
        db: &DatabaseConnection,
        id: i32,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), DbErr> {
        let now = OffsetDateTime::now_utc();
        let mut update = email_job::Entity::update_many()
            .col_expr(email_job::Column::Status, Expr::value(status.as_str()))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(now));
        if let Some(message) = error {
            update = update.col_expr(email_job::Column::LastError, Expr::value(message));
        }
        update
            .filter(email_job::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }
}
