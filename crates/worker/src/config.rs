use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// SMTP submission settings. The whole section is optional: without it the
/// worker computes content and records `logged` outcomes instead of sending.
#[derive(Clone, Debug, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender mailbox, e.g. `Mailroom <no-reply@example.com>`.
    pub from: String,
    /// Implicit TLS (submissions, port 465) when true, STARTTLS otherwise.
    #[serde(default)]
    pub secure: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Base delay for exponential retry backoff; attempt *n* waits
    /// `base * 2^(n-1)` after the previous failure.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,
    /// Attempts cap for jobs that do not carry their own override.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Completed/dead rows kept per queue; oldest beyond this are evicted.
    #[serde(default = "default_retention")]
    pub retention_max_rows: u64,
    /// In-flight jobs older than this are assumed crashed and redelivered.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            poll_interval_secs: default_poll_interval(),
            retry_base_secs: default_retry_base(),
            max_attempts: default_max_attempts(),
            retention_max_rows: default_retention(),
            visibility_timeout_secs: default_visibility_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

fn default_database_url() -> String {
    "sqlite://mailroom.db?mode=rwc".to_string()
}

fn default_queue_name() -> String {
    "email".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_poll_interval() -> u64 {
    5
}

fn default_retry_base() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retention() -> u64 {
    10_000
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_concurrency() -> usize {
    4
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variable override convention: any var matching the key path
/// separated by double underscores (e.g. `SMTP__PORT`, `QUEUE__NAME`)
/// overrides the file value. The file itself is optional; everything except
/// SMTP credentials has a sane default.
///
/// Returns a `ConfigError` instead of panicking so the caller can decide how to fail.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    validate(&app)?;
    Ok(app)
}

fn validate(app: &AppConfig) -> Result<(), ConfigError> {
    if app.queue.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "queue.max_attempts must be > 0".into(),
        ));
    }
    if app.queue.concurrency == 0 {
        return Err(ConfigError::Validation(
            "queue.concurrency must be > 0".into(),
        ));
    }
    if let Some(smtp) = &app.smtp {
        if smtp.port == 0 {
            return Err(ConfigError::Validation("smtp.port must be > 0".into()));
        }
        if smtp.from.is_empty() {
            return Err(ConfigError::Validation("smtp.from must be set".into()));
        }
    }
    Ok(())
}

/// Convenience helper for binaries wanting the old panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
