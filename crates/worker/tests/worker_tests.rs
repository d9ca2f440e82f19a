//! End-to-end tests of the delivery pipeline: suppression, content
//! resolution, transport outcomes, audit rows and retry semantics.

mod common;

use async_trait::async_trait;
use common::{job_to, setup_db, test_config};
use mailroom::AppResources;
use mailroom::entity::{email_job, email_log, email_template, email_unsubscribe};
use mailroom::job::{DeliveryStatus, EmailJob};
use mailroom::queue::{JobQueue, JobStatus};
use mailroom::suppression::is_suppressed;
use mailroom::transport::{Mailer, MailerError, Outgoing};
use mailroom::worker::process_job;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;

/// In-memory transport double: records what it was asked to send and can be
/// told to fail.
#[derive(Default)]
struct FakeMailer {
    sent: Mutex<Vec<Outgoing>>,
    fail: AtomicBool,
}

impl FakeMailer {
    fn failing() -> Self {
        let mailer = Self::default();
        mailer.fail.store(true, Ordering::SeqCst);
        mailer
    }

    fn sent(&self) -> Vec<Outgoing> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, mail: Outgoing) -> Result<String, MailerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailerError::Smtp("connection refused".into()));
        }
        self.sent.lock().expect("sent lock").push(mail);
        Ok("250 2.0.0 OK".into())
    }
}

fn resources(db: DatabaseConnection, mailer: Option<Arc<dyn Mailer>>) -> AppResources {
    AppResources {
        db: Arc::new(db),
        mailer,
        config: Arc::new(test_config()),
    }
}

fn instant_queue() -> JobQueue {
    JobQueue::new("email", Duration::ZERO, 3)
}

async fn logs(db: &DatabaseConnection) -> Vec<email_log::Model> {
    email_log::Entity::find().all(db).await.expect("query logs")
}

async fn suppress(db: &DatabaseConnection, email: &str) {
    email_unsubscribe::ActiveModel {
        id: NotSet,
        email: Set(email.to_owned()),
        token: Set("tok-123".to_owned()),
        reason: Set(Some("user opt-out".to_owned())),
        created_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await
    .expect("insert suppression entry");
}

async fn store_template(db: &DatabaseConnection, id: &str, subject: &str, body: &str) {
    email_template::ActiveModel {
        id: Set(id.to_owned()),
        subject: Set(subject.to_owned()),
        body: Set(body.to_owned()),
    }
    .insert(db)
    .await
    .expect("insert template");
}

async fn submit_and_claim(queue: &JobQueue, db: &DatabaseConnection, job: &EmailJob) -> mailroom::queue::ClaimedJob {
    queue.submit(db, job).await.expect("submit");
    queue.claim(db).await.expect("claim").expect("job available")
}

async fn job_status(db: &DatabaseConnection, id: i32) -> String {
    email_job::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("query job")
        .expect("job row")
        .status
}

#[tokio::test]
async fn suppressed_recipient_is_never_delivered() {
    let db = setup_db().await;
    suppress(&db, "optout@example.com").await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let claimed = submit_and_claim(&queue, &res.db, &job_to("optout@example.com")).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Suppressed);
    assert!(fake.sent().is_empty());

    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "suppressed");
    assert_eq!(logs[0].to_email, "optout@example.com");

    // Suppression is terminal success, not an error: no retry.
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Completed.as_str());
}

#[tokio::test]
async fn missing_recipient_fails_the_attempt_immediately() {
    let db = setup_db().await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let mut job = job_to("ignored");
    job.to = None;
    let claimed = submit_and_claim(&queue, &res.db, &job).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Error);
    assert!(fake.sent().is_empty());

    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "error");
    assert_eq!(logs[0].to_email, "");
    assert_eq!(
        logs[0].provider_response.as_deref(),
        Some("Job has no recipient address")
    );

    // Counted against the attempts cap and retried like any other failure.
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Pending.as_str());
}

#[tokio::test]
async fn missing_recipient_dead_letters_after_the_cap() {
    // The condition can never change between attempts; the queue still burns
    // all attempts before dead-lettering. Documented behaviour, kept as-is.
    let db = setup_db().await;
    let res = resources(db, Some(Arc::new(FakeMailer::default())));
    let queue = instant_queue();

    let mut job = job_to("ignored");
    job.to = None;
    job.attempts = Some(3);
    queue.submit(&res.db, &job).await.expect("submit");

    let mut id = None;
    for _ in 0..3 {
        let claimed = queue.claim(&res.db).await.expect("claim").expect("job available");
        id = Some(claimed.id);
        process_job(&res, &queue, &claimed).await;
    }
    let id = id.expect("claimed at least once");

    assert_eq!(job_status(&res.db, id).await, JobStatus::Dead.as_str());
    assert_eq!(logs(&res.db).await.len(), 3);
}

#[tokio::test]
async fn unconfigured_transport_logs_without_sending() {
    let db = setup_db().await;
    let res = resources(db, None);
    let queue = instant_queue();

    let claimed = submit_and_claim(&queue, &res.db, &job_to("ana@example.com")).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Logged);
    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "logged");
    assert_eq!(logs[0].provider_response, None);
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Completed.as_str());
}

#[tokio::test]
async fn successful_delivery_records_the_provider_response() {
    let db = setup_db().await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let mut job = job_to("ana@example.com");
    job.subject = Some("Hello {{name}}".to_string());
    job.body = Some("<p>Greetings from {{user.city}}</p>".to_string());
    job.variables = json!({"name": "Ana", "user": {"city": "Bogotá"}});

    let claimed = submit_and_claim(&queue, &res.db, &job).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Sent);
    let sent = fake.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ana@example.com");
    assert_eq!(sent[0].from, "Mailroom <no-reply@example.com>");
    assert_eq!(sent[0].subject, "Hello Ana");
    assert_eq!(sent[0].html, "<p>Greetings from Bogotá</p>");

    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "sent");
    assert_eq!(logs[0].provider_response.as_deref(), Some("250 2.0.0 OK"));
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Completed.as_str());
}

#[tokio::test]
async fn stored_template_wins_over_inline_content() {
    let db = setup_db().await;
    store_template(
        &db,
        "welcome",
        "Welcome, {{name}}!",
        "<p>Hi {{name}}, glad you joined.</p>",
    )
    .await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let mut job = job_to("ana@example.com");
    job.template_id = Some("welcome".to_string());
    job.subject = Some("inline subject, should lose".to_string());
    job.variables = json!({"name": "Ana"});

    let claimed = submit_and_claim(&queue, &res.db, &job).await;
    process_job(&res, &queue, &claimed).await;

    let sent = fake.sent();
    assert_eq!(sent[0].subject, "Welcome, Ana!");
    assert_eq!(sent[0].html, "<p>Hi Ana, glad you joined.</p>");

    let logs = logs(&res.db).await;
    assert_eq!(logs[0].template_id.as_deref(), Some("welcome"));
}

#[tokio::test]
async fn template_miss_falls_back_to_inline_content() {
    let db = setup_db().await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let mut job = job_to("ana@example.com");
    job.template_id = Some("does-not-exist".to_string());
    job.subject = Some("Inline {{name}}".to_string());
    job.body = Some("<p>inline body</p>".to_string());
    job.variables = json!({"name": "Ana"});

    let claimed = submit_and_claim(&queue, &res.db, &job).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Sent);
    let sent = fake.sent();
    assert_eq!(sent[0].subject, "Inline Ana");
    assert_eq!(sent[0].html, "<p>inline body</p>");
}

#[tokio::test]
async fn transport_failures_retry_then_dead_letter() {
    let db = setup_db().await;
    let fake = Arc::new(FakeMailer::failing());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let mut job = job_to("ana@example.com");
    job.attempts = Some(3);
    queue.submit(&res.db, &job).await.expect("submit");

    let mut statuses = Vec::new();
    let mut id = None;
    for _ in 0..3 {
        let claimed = queue.claim(&res.db).await.expect("claim").expect("job available");
        id = Some(claimed.id);
        statuses.push(process_job(&res, &queue, &claimed).await);
    }
    let id = id.expect("claimed at least once");

    // Exactly three attempts, three error rows, then dead-letter.
    assert_eq!(statuses, vec![DeliveryStatus::Error; 3]);
    assert_eq!(job_status(&res.db, id).await, JobStatus::Dead.as_str());
    assert!(queue.claim(&res.db).await.expect("claim").is_none());

    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|row| row.status == "error"));
    assert!(
        logs.iter()
            .all(|row| row.provider_response.as_deref().unwrap_or("").contains("connection refused"))
    );
}

#[tokio::test]
async fn suppression_store_errors_fail_open() {
    let db = setup_db().await;
    // Break the suppression store: every lookup from here on errors.
    db.execute_unprepared("DROP TABLE email_unsubscribes")
        .await
        .expect("drop suppression table");

    // The lookup itself answers "not suppressed" instead of erroring out.
    assert!(!is_suppressed(&db, "ana@example.com").await);

    // And the pipeline carries on to delivery rather than blocking the job.
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();
    let claimed = submit_and_claim(&queue, &res.db, &job_to("ana@example.com")).await;
    let status = process_job(&res, &queue, &claimed).await;

    assert_eq!(status, DeliveryStatus::Sent);
    assert_eq!(fake.sent().len(), 1);
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Completed.as_str());
}

#[tokio::test]
async fn audit_failures_never_block_the_outcome_report() {
    let db = setup_db().await;
    // Break the delivery log: every audit insert from here on errors.
    db.execute_unprepared("DROP TABLE email_logs")
        .await
        .expect("drop log table");

    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let claimed = submit_and_claim(&queue, &res.db, &job_to("ana@example.com")).await;
    let status = process_job(&res, &queue, &claimed).await;

    // Best-effort audit, never block on audit: the send went out and the
    // queue still learned the outcome.
    assert_eq!(status, DeliveryStatus::Sent);
    assert_eq!(fake.sent().len(), 1);
    assert_eq!(job_status(&res.db, claimed.id).await, JobStatus::Completed.as_str());
}

#[tokio::test]
async fn redelivery_after_crash_logs_one_row_per_attempt() {
    let db = setup_db().await;
    let fake = Arc::new(FakeMailer::default());
    let res = resources(db, Some(fake.clone()));
    let queue = instant_queue();

    let claimed = submit_and_claim(&queue, &res.db, &job_to("ana@example.com")).await;
    process_job(&res, &queue, &claimed).await;

    // Simulate a crash between delivery success and acknowledgment: the row
    // comes back as pending and the job is delivered again.
    let row = email_job::Entity::find_by_id(claimed.id)
        .one(res.db.as_ref())
        .await
        .expect("query job")
        .expect("job row");
    let mut active: email_job::ActiveModel = row.into();
    active.status = Set(JobStatus::Pending.as_str().to_owned());
    active.available_at = Set(OffsetDateTime::now_utc() - Duration::from_secs(1));
    active.update(res.db.as_ref()).await.expect("requeue");

    let redelivered = queue
        .claim(res.db.as_ref())
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(redelivered.id, claimed.id);
    process_job(&res, &queue, &redelivered).await;

    // Two sent rows for one logical job: log rows are attempts, not jobs.
    let logs = logs(&res.db).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|row| row.status == "sent"));
    assert_eq!(fake.sent().len(), 2);
}
