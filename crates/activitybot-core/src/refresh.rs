//! Scheduled re-render of the leaderboard into the designated channel.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    leaderboard::LeaderboardPage, pagination::PageTracker, tracker::ActivityTracker,
};

/// Live guild data a render is resolved against.
#[derive(Debug, Clone, Default)]
pub struct GuildView {
    pub icon_url: Option<String>,
    /// Display name per user id, current members only.
    pub members: HashMap<String, String>,
}

/// Where automatic renders are posted and removed.
#[async_trait]
pub trait LeaderboardPublisher: Send + Sync {
    async fn guild_view(&self) -> anyhow::Result<GuildView>;

    /// Posts a render with its page controls and returns the message id.
    async fn publish(&self, page: &LeaderboardPage, icon_url: Option<&str>) -> anyhow::Result<u64>;

    async fn retract(&self, message_id: u64) -> anyhow::Result<()>;
}

/// Time left until the next multiple of `interval_secs` since the epoch.
/// An hourly interval therefore fires at the top of each hour.
pub fn duration_until_next_tick(now: DateTime<Utc>, interval_secs: u64) -> Duration {
    if interval_secs == 0 {
        return Duration::ZERO;
    }
    let interval_ms = interval_secs.saturating_mul(1000);
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let into_interval = now_ms % interval_ms;
    Duration::from_millis(interval_ms - into_interval)
}

pub struct LeaderboardRefresher {
    tracker: Arc<ActivityTracker>,
    publisher: Arc<dyn LeaderboardPublisher>,
    pages: Arc<PageTracker>,
    page_size: usize,
    last_auto_render: Mutex<Option<u64>>,
}

impl LeaderboardRefresher {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        publisher: Arc<dyn LeaderboardPublisher>,
        pages: Arc<PageTracker>,
        page_size: usize,
    ) -> Self {
        Self {
            tracker,
            publisher,
            pages,
            page_size,
            last_auto_render: Mutex::new(None),
        }
    }

    pub async fn last_auto_render(&self) -> Option<u64> {
        *self.last_auto_render.lock().await
    }

    /// Posts page 0 and removes the previous automatic render.
    ///
    /// Nothing is posted or removed when the user list cannot be loaded.
    pub async fn refresh_once(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let source = self.tracker.leaderboard_source(now).await?;
        let guild = self.publisher.guild_view().await?;
        let page = source.render(0, self.page_size, &guild.members, now);

        let message_id = self
            .publisher
            .publish(&page, guild.icon_url.as_deref())
            .await?;
        self.pages.set(message_id, 0).await;

        let previous = self.last_auto_render.lock().await.replace(message_id);
        if let Some(previous) = previous {
            self.pages.forget(previous).await;
            if let Err(error) = self.publisher.retract(previous).await {
                warn!(message_id = previous, ?error, "failed to delete previous leaderboard");
            }
        }

        info!(message_id, users = page.total_users, "leaderboard refreshed");
        Ok(message_id)
    }

    pub fn start(self: &Arc<Self>, interval_secs: u64) {
        if interval_secs == 0 {
            info!("scheduled leaderboard refresh disabled");
            return;
        }

        let refresher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(duration_until_next_tick(Utc::now(), interval_secs)).await;
                if let Err(error) = refresher.refresh_once(Utc::now()).await {
                    warn!(?error, "scheduled leaderboard refresh failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::Mutex;

    use super::{GuildView, LeaderboardPublisher, LeaderboardRefresher, duration_until_next_tick};
    use crate::{
        leaderboard::LeaderboardPage,
        pagination::PageTracker,
        stats::ActivityHours,
        store::InMemoryActivityStore,
        tracker::ActivityTracker,
        types::MessageRecord,
    };

    #[derive(Default)]
    struct RecordingPublisher {
        next_id: AtomicU64,
        fail_guild: AtomicBool,
        fail_retract: AtomicBool,
        posted: Mutex<Vec<(u64, LeaderboardPage)>>,
        retracted: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl LeaderboardPublisher for RecordingPublisher {
        async fn guild_view(&self) -> anyhow::Result<GuildView> {
            if self.fail_guild.load(Ordering::SeqCst) {
                anyhow::bail!("guild unavailable");
            }
            let mut view = GuildView::default();
            view.members.insert("u1".to_owned(), "alice".to_owned());
            Ok(view)
        }

        async fn publish(
            &self,
            page: &LeaderboardPage,
            _icon_url: Option<&str>,
        ) -> anyhow::Result<u64> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 100;
            self.posted.lock().await.push((id, page.clone()));
            Ok(id)
        }

        async fn retract(&self, message_id: u64) -> anyhow::Result<()> {
            self.retracted.lock().await.push(message_id);
            if self.fail_retract.load(Ordering::SeqCst) {
                anyhow::bail!("unknown message");
            }
            Ok(())
        }
    }

    async fn setup() -> (
        Arc<LeaderboardRefresher>,
        Arc<RecordingPublisher>,
        Arc<PageTracker>,
    ) {
        let tracker = Arc::new(ActivityTracker::new(
            Arc::new(InMemoryActivityStore::default()),
            ActivityHours::default(),
        ));
        tracker
            .record_message(MessageRecord::new("m1", "u1", "c1", Utc::now()))
            .await
            .expect("record should succeed");

        let publisher = Arc::new(RecordingPublisher::default());
        let pages = Arc::new(PageTracker::new());
        let refresher = Arc::new(LeaderboardRefresher::new(
            tracker,
            publisher.clone(),
            pages.clone(),
            10,
        ));
        (refresher, publisher, pages)
    }

    #[test]
    fn next_tick_aligns_to_top_of_hour() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        assert_eq!(duration_until_next_tick(now, 3600), Duration::from_secs(45 * 60));

        let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();
        assert_eq!(duration_until_next_tick(on_the_hour, 3600), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn replaces_previous_automatic_render() {
        let (refresher, publisher, pages) = setup().await;

        let first = refresher.refresh_once(Utc::now()).await.expect("first refresh");
        let second = refresher.refresh_once(Utc::now()).await.expect("second refresh");

        assert_eq!(*publisher.retracted.lock().await, vec![first]);
        assert_eq!(refresher.last_auto_render().await, Some(second));
        assert!(pages.contains(second).await);
        assert!(!pages.contains(first).await);

        let posted = publisher.posted.lock().await;
        assert_eq!(posted[1].1.page, 0);
        assert_eq!(posted[1].1.entries[0].display_name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn delete_failure_is_tolerated() {
        let (refresher, publisher, _) = setup().await;
        publisher.fail_retract.store(true, Ordering::SeqCst);

        refresher.refresh_once(Utc::now()).await.expect("first refresh");
        let second = refresher
            .refresh_once(Utc::now())
            .await
            .expect("refresh survives a failed delete");
        assert_eq!(refresher.last_auto_render().await, Some(second));
    }

    #[tokio::test]
    async fn fetch_failure_has_no_side_effects() {
        let (refresher, publisher, _) = setup().await;
        let first = refresher.refresh_once(Utc::now()).await.expect("first refresh");

        publisher.fail_guild.store(true, Ordering::SeqCst);
        assert!(refresher.refresh_once(Utc::now()).await.is_err());

        assert_eq!(publisher.posted.lock().await.len(), 1);
        assert!(publisher.retracted.lock().await.is_empty());
        assert_eq!(refresher.last_auto_render().await, Some(first));
    }
}
