//! Producer-side API: batch submission into the job queue.

use crate::job::EmailJob;
use crate::queue::JobQueue;
use sea_orm::DatabaseConnection;

/// Submit a batch of jobs, each independently.
///
/// A failure submitting one job is logged and that job is excluded from the
/// returned id list; the rest of the batch still goes through. Nothing about
/// the jobs themselves is validated here — recipient presence is checked by
/// the worker at dequeue time.
#[tracing::instrument(skip_all, fields(batch_size = jobs.len()))]
pub async fn enqueue_batch(
    queue: &JobQueue,
    db: &DatabaseConnection,
    jobs: &[EmailJob],
) -> Vec<i32> {
    let mut ids = Vec::with_capacity(jobs.len());
    for job in jobs {
        match queue.submit(db, job).await {
            Ok(id) => ids.push(id),
            Err(e) => {
                tracing::error!(
                    name = "enqueue.submit_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    to = ?job.to,
                    message = "Failed to submit email job; continuing with the rest of the batch"
                );
            }
        }
    }
    ids
}
