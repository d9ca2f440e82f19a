use mailroom::AppResources;
use mailroom::config::load_config_or_panic;
use mailroom::queue::JobQueue;
use mailroom::transport::{Mailer, SmtpMailer};
use mailroom::worker::{run_housekeeping, run_worker_loop};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "mailroom=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install().expect("Failed to install `color_eyre::install`");
    initialize_tracing();
    dotenvy::dotenv().ok();

    // Load config
    let config = Arc::new(load_config_or_panic());

    // Set up SeaORM database connection and make sure the tables exist
    let db = Arc::new(
        Database::connect(&config.database_url)
            .await
            .expect("Failed to connect to database"),
    );
    Migrator::up(db.as_ref(), None).await?;

    // Set up lettre SMTP client, if a transport is configured at all
    let mailer: Option<Arc<dyn Mailer>> = match config.smtp.as_ref() {
        Some(smtp) => Some(Arc::new(SmtpMailer::from_config(smtp)?)),
        None => {
            tracing::warn!(
                name = "main.no_transport",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                message = "No SMTP transport configured; deliveries will be logged without sending"
            );
            None
        }
    };

    let resources = Arc::new(AppResources {
        db,
        mailer,
        config: config.clone(),
    });
    let queue = Arc::new(JobQueue::from_config(&config.queue));
    let shutdown = Arc::new(AtomicBool::new(false));

    tracing::info!(
        queue = queue.name(),
        concurrency = config.queue.concurrency,
        "Starting email delivery workers"
    );

    let mut handles = Vec::new();
    for _ in 0..config.queue.concurrency {
        handles.push(tokio::spawn(run_worker_loop(
            resources.clone(),
            queue.clone(),
            shutdown.clone(),
        )));
    }
    handles.push(tokio::spawn(run_housekeeping(
        resources.clone(),
        queue.clone(),
        shutdown.clone(),
    )));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested; draining worker loops");
    shutdown.store(true, Ordering::SeqCst);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
