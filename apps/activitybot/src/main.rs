use std::{fs::OpenOptions, io, path::Path, sync::Arc, time::Duration};

use activitybot_core::{
    backup::BackupManager,
    badges::default_catalog,
    config::{AppConfig, StorageBackend},
    discord_bot::{self, BotServices},
    http::{self, AppState},
    store::{ActivityStore, InMemoryActivityStore, SqliteActivityStore},
    tracker::ActivityTracker,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt::writer::MakeWriterExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(AppConfig::from_env()?);
    init_tracing(config.log_file.as_deref())?;

    let store = build_store(&config).await?;
    store.seed_badges(&default_catalog()).await?;

    let tracker = Arc::new(ActivityTracker::new(
        store.clone(),
        config.activity_hours.clone(),
    ));
    let backups = Arc::new(BackupManager::new(store, config.backup_dir.clone()));
    backups.start_periodic(Duration::from_secs(config.backup_interval_secs));

    if let Some(bind) = config.http_bind {
        let app = http::router(AppState {
            tracker: tracker.clone(),
            page_size: config.page_size,
        });
        let listener = TcpListener::bind(bind).await?;
        info!("status API listening on {bind}");
        tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                warn!(?error, "status API stopped with error");
            }
        });
    }

    let services = BotServices { tracker, backups };
    if let Err(error) = discord_bot::start_discord_bot(config, services).await {
        error!(?error, "Discord bot stopped with error");
        return Err(error);
    }
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_writer(io::stdout.and(Arc::new(file)))
                .with_ansi(false)
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ActivityStore>> {
    match config.storage_backend {
        StorageBackend::Sqlite => {
            let store = SqliteActivityStore::connect(&config.database_url).await?;
            info!(database_url = %config.database_url, "connected to SQLite activity store");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("STORAGE_BACKEND=memory; activity data is lost on restart");
            Ok(Arc::new(InMemoryActivityStore::default()))
        }
    }
}
