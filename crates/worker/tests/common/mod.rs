//! Shared test fixtures: an in-memory database with the real schema, plus
//! config and job builders.

use mailroom::config::{AppConfig, QueueConfig, SmtpConfig};
use mailroom::job::EmailJob;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// Fresh in-memory SQLite database with the subsystem's tables applied.
///
/// A single pooled connection keeps the `:memory:` database alive and shared
/// for the whole test.
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options)
        .await
        .expect("connect to in-memory sqlite");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// Config with instant retries so failure paths run without waiting.
pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        queue: QueueConfig {
            retry_base_secs: 0,
            poll_interval_secs: 1,
            ..QueueConfig::default()
        },
        smtp: Some(SmtpConfig {
            server: "smtp.example.com".to_string(),
            port: 587,
            username: "mailroom".to_string(),
            password: "hunter2".to_string(),
            from: "Mailroom <no-reply@example.com>".to_string(),
            secure: false,
        }),
    }
}

pub fn job_to(address: &str) -> EmailJob {
    let mut job = EmailJob::to_address(address);
    job.subject = Some("Test subject".to_string());
    job.body = Some("<p>Test body</p>".to_string());
    job
}
