use sea_orm_migration::prelude::*;
use std::env;

/// `database_url` from `config.yaml`, when the file exists and carries one.
fn configured_database_url() -> Option<String> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config.yaml"))
        .build()
        .ok()?;
    settings.get_string("database_url").ok()
}

#[tokio::main]
async fn main() {
    // The sea-orm CLI reads DATABASE_URL; let the worker's config.yaml stand
    // in when the environment doesn't set it.
    if env::var("DATABASE_URL").is_err() {
        match configured_database_url() {
            Some(url) => env::set_var("DATABASE_URL", url),
            None => eprintln!(
                "DATABASE_URL is not set and config.yaml has no database_url; \
                 pass the URL via the environment or -u"
            ),
        }
    }
    cli::run_cli(migration::Migrator).await;
}
