use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    leaderboard::LeaderboardSource,
    stats::ActivityHours,
    store::ActivityStore,
    types::{MessageRecord, RecordOutcome, ResetSummary, UserReport},
};

/// Entry point for everything that reads or changes activity data.
pub struct ActivityTracker {
    store: Arc<dyn ActivityStore>,
    hours: ActivityHours,
}

impl ActivityTracker {
    pub fn new(store: Arc<dyn ActivityStore>, hours: ActivityHours) -> Self {
        Self { store, hours }
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    pub async fn record_message(
        &self,
        message: MessageRecord,
    ) -> anyhow::Result<Option<RecordOutcome>> {
        let message_id = message.message_id.clone();
        let outcome = self.store.record_message(message, &self.hours).await?;

        match &outcome {
            Some(outcome) => {
                if outcome.created_user {
                    info!(user_id = %outcome.stats.user_id, "tracking new user");
                }
                for badge in &outcome.new_badges {
                    info!(
                        user_id = %outcome.stats.user_id,
                        badge = %badge.name,
                        "badge awarded"
                    );
                }
            }
            None => debug!(%message_id, "skipping duplicate message"),
        }

        Ok(outcome)
    }

    pub async fn record_reaction(&self, message_id: &str) -> anyhow::Result<bool> {
        self.store.record_reaction(message_id).await
    }

    /// Loads the ranked users plus the badge glyphs and trailing-24h counts.
    pub async fn leaderboard_source(
        &self,
        now: DateTime<Utc>,
    ) -> anyhow::Result<LeaderboardSource> {
        let users = self.store.ranked_users().await?;
        let badge_glyphs = self.store.badge_glyphs().await?;
        let recent_counts = self
            .store
            .message_counts_since(now - Duration::hours(24))
            .await?;

        Ok(LeaderboardSource {
            users,
            badge_glyphs,
            recent_counts,
        })
    }

    pub async fn user_report(&self, user_id: &str) -> anyhow::Result<Option<UserReport>> {
        let Some(stats) = self.store.user_stats(user_id).await? else {
            return Ok(None);
        };
        let badges = self.store.user_badges(user_id).await?;
        let patterns = self.store.activity_patterns(user_id).await?;

        Ok(Some(UserReport {
            stats,
            badges,
            patterns,
        }))
    }

    pub async fn reset(&self) -> anyhow::Result<ResetSummary> {
        let summary = self.store.reset().await?;
        info!(
            users = summary.users,
            messages = summary.messages,
            activity_patterns = summary.activity_patterns,
            user_badges = summary.user_badges,
            "activity data reset"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::ActivityTracker;
    use crate::{
        badges::default_catalog,
        leaderboard::NoDirectory,
        stats::ActivityHours,
        store::{ActivityStore, InMemoryActivityStore},
        types::MessageRecord,
    };

    async fn tracker() -> ActivityTracker {
        let store = Arc::new(InMemoryActivityStore::default());
        store
            .seed_badges(&default_catalog())
            .await
            .expect("seeding should succeed");
        ActivityTracker::new(store, ActivityHours::default())
    }

    #[tokio::test]
    async fn leaderboard_source_counts_trailing_day_only() {
        let tracker = tracker().await;
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

        let history = [
            ("m1", "u1", 30),
            ("m2", "u1", 2),
            ("m3", "u2", 1),
            ("m4", "u2", 5),
        ];
        for (id, user, age_hours) in history {
            let sent_at = now - Duration::hours(age_hours);
            tracker
                .record_message(MessageRecord::new(id, user, "c1", sent_at))
                .await
                .expect("record should succeed");
        }

        let source = tracker.leaderboard_source(now).await.expect("source should load");
        let page = source.render(0, 10, &NoDirectory, now);

        assert_eq!(page.entries.len(), 2);
        let u1 = page
            .entries
            .iter()
            .find(|entry| entry.user_id == "u1")
            .expect("u1 ranked");
        assert_eq!(u1.total_messages, 2);
        assert_eq!(u1.recent_messages, 1);
        let u2 = page
            .entries
            .iter()
            .find(|entry| entry.user_id == "u2")
            .expect("u2 ranked");
        assert_eq!(u2.recent_messages, 2);
    }

    #[tokio::test]
    async fn user_report_bundles_stats_badges_and_patterns() {
        let tracker = tracker().await;
        let saturday_night = Utc.with_ymd_and_hms(2024, 1, 6, 23, 0, 0).unwrap();
        tracker
            .record_message(MessageRecord::new("m1", "u1", "c1", saturday_night))
            .await
            .expect("record should succeed");

        let report = tracker
            .user_report("u1")
            .await
            .expect("report should load")
            .expect("user exists");
        assert_eq!(report.stats.total_messages, 1);
        assert_eq!(report.badges.len(), 2);
        assert_eq!(report.peak_hour(), Some(23));

        assert!(tracker.user_report("ghost").await.expect("report").is_none());
    }

    #[tokio::test]
    async fn reset_then_new_message_starts_fresh() {
        let tracker = tracker().await;
        let day = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        for offset in 0..3 {
            tracker
                .record_message(MessageRecord::new(
                    format!("m{offset}"),
                    "u1",
                    "c1",
                    day + Duration::days(offset),
                ))
                .await
                .expect("record should succeed");
        }

        tracker.reset().await.expect("reset should succeed");
        let outcome = tracker
            .record_message(MessageRecord::new("m9", "u1", "c1", day + Duration::days(3)))
            .await
            .expect("record should succeed")
            .expect("message is new");

        assert!(outcome.created_user);
        assert_eq!(outcome.stats.total_messages, 1);
        assert_eq!(outcome.stats.streak, 1);
        assert_eq!(outcome.stats.best_streak, 1);
    }
}
