use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::store::ActivityStore;

/// Writes timestamped copies of the store into a backup directory.
pub struct BackupManager {
    store: Arc<dyn ActivityStore>,
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(store: Arc<dyn ActivityStore>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "leaderboard_{}.{}",
            now.format("%Y%m%d_%H%M%S"),
            self.store.backup_extension()
        ))
    }

    pub async fn create_backup(&self, now: DateTime<Utc>) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.backup_path(now);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to replace {}", path.display()))?;
        }

        self.store.backup_to(&path).await?;
        info!(path = %path.display(), "backup created");
        Ok(path)
    }

    /// Backs up every `interval`, skipping the immediate first tick.
    pub fn start_periodic(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            info!("periodic backups disabled");
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(error) = manager.create_backup(Utc::now()).await {
                    warn!(?error, "periodic backup failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::BackupManager;
    use crate::{
        badges::default_catalog,
        stats::ActivityHours,
        store::{ActivityStore, InMemoryActivityStore, SqliteActivityStore},
        types::MessageRecord,
    };

    #[tokio::test]
    async fn names_backups_by_timestamp_and_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryActivityStore::default());
        let manager = BackupManager::new(store, dir.path().join("nested"));
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        let path = manager.create_backup(now).await.expect("backup should succeed");

        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("leaderboard_20240506_070809.json")
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn sqlite_backup_is_a_readable_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("activity.db").display());
        let store = Arc::new(
            SqliteActivityStore::connect(&url)
                .await
                .expect("store should open"),
        );
        store
            .seed_badges(&default_catalog())
            .await
            .expect("seeding should succeed");
        let _ = store
            .record_message(
                MessageRecord::new("m1", "u1", "c1", Utc::now()),
                &ActivityHours::default(),
            )
            .await
            .expect("record should succeed");

        let manager = BackupManager::new(store, dir.path().join("backups"));
        let path = manager
            .create_backup(Utc::now())
            .await
            .expect("backup should succeed");
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("db"));

        let url = format!("sqlite://{}", path.display());
        let copy = SqliteActivityStore::connect(&url)
            .await
            .expect("backup should open");
        let stats = copy
            .user_stats("u1")
            .await
            .expect("stats should load")
            .expect("user copied");
        assert_eq!(stats.total_messages, 1);
    }
}
