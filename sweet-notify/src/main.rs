use sweet_notify::config::AppConfig;
use sweet_notify::notification::{NotifiableEvent, Notifier};
use sweet_notify::{database, logging};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Reads one JSON-encoded notifiable event per line from stdin and sends it.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(&config.log)?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let notifier = Notifier::from_config(pool.clone(), &config)?;
    tracing::info!("sweet-notify initialized successfully");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NotifiableEvent>(line) {
            Ok(event) => notifier.notify(event).await,
            Err(e) => tracing::warn!(error = %e, "Skipping invalid event"),
        }
    }

    pool.close().await;
    tracing::info!("Input closed, shutting down");
    Ok(())
}
