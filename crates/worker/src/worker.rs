//! The consumption side: per-job delivery pipeline and the long-lived
//! worker loop that drains the queue.
//!
//! Each claimed job walks a strictly sequential pipeline:
//! received → suppression-checked → content-resolved → delivery-attempted →
//! {acked | retried | dead-lettered}. The audit row for an outcome is always
//! written before the queue learns about it (log-then-ack), so a crash
//! between the two can only ever redeliver a job whose attempt is already on
//! record — never the other way around.

use crate::AppResources;
use crate::audit;
use crate::entity::email_template;
use crate::error::DeliveryError;
use crate::job::{DeliveryStatus, EmailJob};
use crate::queue::{ClaimedJob, JobQueue, JobStatus};
use crate::render;
use crate::suppression;
use crate::transport::Outgoing;
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Duration;

/// Run one claimed job through the full pipeline and report its outcome to
/// the queue. Returns the status that was written to the delivery log.
#[tracing::instrument(skip(resources, queue, claimed), fields(job_id = claimed.id, attempt = claimed.attempt))]
pub async fn process_job(
    resources: &AppResources,
    queue: &JobQueue,
    claimed: &ClaimedJob,
) -> DeliveryStatus {
    let db = resources.db.as_ref();
    let job = &claimed.job;
    let template_id = job.template_id.as_deref();

    // received: the recipient must be present before anything else runs.
    let to = job.to.as_deref().map(str::trim).unwrap_or("");
    if to.is_empty() {
        let error = DeliveryError::MissingRecipient;
        audit::record(db, to, template_id, DeliveryStatus::Error, Some(&error.to_string())).await;
        report_failure(queue, db, claimed, &error.to_string()).await;
        return DeliveryStatus::Error;
    }

    // suppression-checked: a hit is terminal success, never retried.
    if suppression::is_suppressed(db, to).await {
        audit::record(db, to, template_id, DeliveryStatus::Suppressed, None).await;
        report_success(queue, db, claimed).await;
        return DeliveryStatus::Suppressed;
    }

    // content-resolved
    let (subject, body) = resolve_content(db, job).await;

    // delivery-attempted
    let Some(mailer) = resources.mailer.as_ref() else {
        // No transport configured: record the computed content, done.
        audit::record(db, to, template_id, DeliveryStatus::Logged, None).await;
        report_success(queue, db, claimed).await;
        return DeliveryStatus::Logged;
    };

    let from = resources
        .config
        .smtp
        .as_ref()
        .map(|smtp| smtp.from.clone())
        .unwrap_or_default();
    let outgoing = Outgoing {
        from,
        to: to.to_owned(),
        subject,
        html: body,
    };

    match mailer.send(outgoing).await {
        Ok(provider_response) => {
            audit::record(db, to, template_id, DeliveryStatus::Sent, Some(&provider_response))
                .await;
            report_success(queue, db, claimed).await;
            DeliveryStatus::Sent
        }
        Err(e) => {
            let error = DeliveryError::from(e);
            audit::record(db, to, template_id, DeliveryStatus::Error, Some(&error.to_string()))
                .await;
            report_failure(queue, db, claimed, &error.to_string()).await;
            DeliveryStatus::Error
        }
    }
}

/// Resolve the job's final subject and body.
///
/// A present `template_id` wins when the row exists; a lookup miss or a
/// store error falls back to the inline fields. Both paths run through the
/// placeholder resolver against the job's variables.
async fn resolve_content(db: &DatabaseConnection, job: &EmailJob) -> (String, String) {
    if let Some(template_id) = job.template_id.as_deref() {
        match email_template::Entity::find_by_id(template_id).one(db).await {
            Ok(Some(template)) => {
                return (
                    render::resolve(&template.subject, &job.variables),
                    render::resolve(&template.body, &job.variables),
                );
            }
            Ok(None) => {
                tracing::debug!(
                    name = "worker.template_missing",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    template_id = %template_id,
                    message = "Template not found; falling back to inline content"
                );
            }
            Err(e) => {
                tracing::warn!(
                    name = "worker.template_lookup_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    template_id = %template_id,
                    error = %e,
                    message = "Template lookup failed; falling back to inline content"
                );
            }
        }
    }
    (
        render::resolve(job.subject.as_deref().unwrap_or(""), &job.variables),
        render::resolve(job.body.as_deref().unwrap_or(""), &job.variables),
    )
}

async fn report_success(queue: &JobQueue, db: &DatabaseConnection, claimed: &ClaimedJob) {
    if let Err(e) = queue.ack(db, claimed.id).await {
        // The audit row is already written; a redelivery here just produces
        // another attempt row, which at-least-once semantics permit.
        tracing::error!(
            name = "worker.ack_failed",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            job_id = claimed.id,
            error = %e,
            message = "Failed to acknowledge job; it will be redelivered"
        );
    }
}

async fn report_failure(
    queue: &JobQueue,
    db: &DatabaseConnection,
    claimed: &ClaimedJob,
    error: &str,
) {
    match queue.nack(db, claimed.id, error).await {
        Ok(JobStatus::Dead) => {
            tracing::error!(
                name = "worker.job_dead_lettered",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                job_id = claimed.id,
                attempt = claimed.attempt,
                error = %error,
                message = "Attempts exhausted; job dead-lettered"
            );
        }
        Ok(_) => {
            tracing::warn!(
                name = "worker.attempt_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                job_id = claimed.id,
                attempt = claimed.attempt,
                error = %error,
                message = "Delivery attempt failed; retry scheduled"
            );
        }
        Err(e) => {
            tracing::error!(
                name = "worker.nack_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                job_id = claimed.id,
                error = %e,
                message = "Failed to report attempt failure to the queue"
            );
        }
    }
}

/// One worker loop: claim, process, repeat until the shutdown flag flips.
///
/// Several of these run concurrently against the same queue; claim's guarded
/// update keeps them from stepping on each other. An empty poll sleeps for
/// the configured interval before trying again.
pub async fn run_worker_loop(
    resources: Arc<AppResources>,
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
) {
    let poll_interval = Duration::from_secs(resources.config.queue.poll_interval_secs.max(1));
    while !shutdown.load(Ordering::SeqCst) {
        match queue.claim(resources.db.as_ref()).await {
            Ok(Some(claimed)) => {
                process_job(&resources, &queue, &claimed).await;
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(
                    name = "worker.claim_failed",
                    target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                    error = %e,
                    message = "Failed to claim a job from the queue"
                );
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
    tracing::info!(
        name = "worker.loop_stopped",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        queue = queue.name(),
        message = "Worker loop stopped"
    );
}

/// Housekeeping loop: redeliver crashed jobs and bound finished-row storage.
pub async fn run_housekeeping(
    resources: Arc<AppResources>,
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
) {
    let visibility_timeout =
        Duration::from_secs(resources.config.queue.visibility_timeout_secs.max(1));
    let retention = resources.config.queue.retention_max_rows;
    // Sweep at the visibility timeout granularity; finer makes no difference.
    let sweep_interval = visibility_timeout.min(Duration::from_secs(60));
    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = queue
            .requeue_stale(resources.db.as_ref(), visibility_timeout)
            .await
        {
            tracing::error!(
                name = "worker.requeue_stale_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to requeue stale jobs"
            );
        }
        if let Err(e) = queue.prune_finished(resources.db.as_ref(), retention).await {
            tracing::error!(
                name = "worker.prune_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                error = %e,
                message = "Failed to prune finished jobs"
            );
        }
        tokio::time::sleep(sweep_interval).await;
    }
}
