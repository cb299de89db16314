use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{tracker::ActivityTracker, types::MessageRecord};

/// Read access to past messages of tracked channels.
#[async_trait]
pub trait ChannelHistory: Send + Sync {
    async fn tracked_channels(&self) -> anyhow::Result<Vec<u64>>;

    /// Up to `limit` of the newest non-bot messages in `channel_id`.
    async fn recent_messages(&self, channel_id: u64, limit: usize)
    -> anyhow::Result<Vec<MessageRecord>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub channels: usize,
    pub scanned: usize,
    pub ingested: usize,
    /// Messages whose ingest failed; each one is logged and skipped.
    pub failed: usize,
}

pub struct Backfiller {
    tracker: Arc<ActivityTracker>,
    history: Arc<dyn ChannelHistory>,
    limit: usize,
}

impl Backfiller {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        history: Arc<dyn ChannelHistory>,
        limit: usize,
    ) -> Self {
        Self {
            tracker,
            history,
            limit,
        }
    }

    pub async fn run_once(&self) -> anyhow::Result<BackfillReport> {
        let channels = self.history.tracked_channels().await?;
        let mut report = BackfillReport {
            channels: channels.len(),
            ..BackfillReport::default()
        };

        let mut collected = Vec::new();
        for channel_id in channels {
            match self.history.recent_messages(channel_id, self.limit).await {
                Ok(messages) => collected.extend(messages),
                Err(error) => warn!(channel_id, ?error, "skipping unreadable channel"),
            }
        }
        report.scanned = collected.len();
        let tally = ingest_in_order(&self.tracker, collected).await;
        report.ingested = tally.ingested;
        report.failed = tally.failed;

        info!(
            channels = report.channels,
            scanned = report.scanned,
            ingested = report.ingested,
            failed = report.failed,
            "backfill finished"
        );
        Ok(report)
    }

    pub fn start(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            info!("periodic backfill disabled");
            return;
        }

        let backfiller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(error) = backfiller.run_once().await {
                    warn!(?error, "periodic backfill failed");
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestTally {
    pub ingested: usize,
    pub failed: usize,
}

/// Ingests oldest first so streaks see days in order. A failing message is
/// logged and the rest still go through.
pub async fn ingest_in_order(
    tracker: &ActivityTracker,
    mut messages: Vec<MessageRecord>,
) -> IngestTally {
    messages.sort_by(|left, right| {
        left.timestamp
            .cmp(&right.timestamp)
            .then_with(|| left.message_id.cmp(&right.message_id))
    });

    let mut tally = IngestTally::default();
    for message in messages {
        let message_id = message.message_id.clone();
        match tracker.record_message(message).await {
            Ok(Some(_)) => tally.ingested += 1,
            Ok(None) => {}
            Err(error) => {
                error!(%message_id, ?error, "failed to ingest history message");
                tally.failed += 1;
            }
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path, sync::Arc};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{Backfiller, ChannelHistory, IngestTally, ingest_in_order};
    use crate::{
        stats::ActivityHours,
        store::{ActivityStore, InMemoryActivityStore},
        tracker::ActivityTracker,
        types::{
            ActivityPattern, Badge, EarnedBadge, MessageRecord, RecordOutcome, ResetSummary,
            UserStats,
        },
    };

    /// In-memory store that refuses one message id.
    struct RejectingStore {
        inner: InMemoryActivityStore,
        rejected: &'static str,
    }

    #[async_trait]
    impl ActivityStore for RejectingStore {
        async fn seed_badges(&self, catalog: &[Badge]) -> anyhow::Result<()> {
            self.inner.seed_badges(catalog).await
        }

        async fn badge_catalog(&self) -> anyhow::Result<Vec<Badge>> {
            self.inner.badge_catalog().await
        }

        async fn record_message(
            &self,
            message: MessageRecord,
            hours: &ActivityHours,
        ) -> anyhow::Result<Option<RecordOutcome>> {
            if message.message_id == self.rejected {
                anyhow::bail!("database is locked");
            }
            self.inner.record_message(message, hours).await
        }

        async fn record_reaction(&self, message_id: &str) -> anyhow::Result<bool> {
            self.inner.record_reaction(message_id).await
        }

        async fn message(&self, message_id: &str) -> anyhow::Result<Option<MessageRecord>> {
            self.inner.message(message_id).await
        }

        async fn user_stats(&self, user_id: &str) -> anyhow::Result<Option<UserStats>> {
            self.inner.user_stats(user_id).await
        }

        async fn user_badges(&self, user_id: &str) -> anyhow::Result<Vec<EarnedBadge>> {
            self.inner.user_badges(user_id).await
        }

        async fn activity_patterns(&self, user_id: &str) -> anyhow::Result<Vec<ActivityPattern>> {
            self.inner.activity_patterns(user_id).await
        }

        async fn ranked_users(&self) -> anyhow::Result<Vec<UserStats>> {
            self.inner.ranked_users().await
        }

        async fn badge_glyphs(&self) -> anyhow::Result<HashMap<String, Vec<String>>> {
            self.inner.badge_glyphs().await
        }

        async fn message_counts_since(
            &self,
            since: DateTime<Utc>,
        ) -> anyhow::Result<HashMap<String, i64>> {
            self.inner.message_counts_since(since).await
        }

        async fn reset(&self) -> anyhow::Result<ResetSummary> {
            self.inner.reset().await
        }

        async fn backup_to(&self, path: &Path) -> anyhow::Result<()> {
            self.inner.backup_to(path).await
        }

        fn backup_extension(&self) -> &'static str {
            self.inner.backup_extension()
        }
    }

    struct FixedHistory {
        channels: HashMap<u64, Vec<MessageRecord>>,
    }

    #[async_trait]
    impl ChannelHistory for FixedHistory {
        async fn tracked_channels(&self) -> anyhow::Result<Vec<u64>> {
            let mut ids = self.channels.keys().copied().collect::<Vec<_>>();
            ids.push(999);
            ids.sort_unstable();
            Ok(ids)
        }

        async fn recent_messages(
            &self,
            channel_id: u64,
            limit: usize,
        ) -> anyhow::Result<Vec<MessageRecord>> {
            let Some(messages) = self.channels.get(&channel_id) else {
                anyhow::bail!("missing access");
            };
            Ok(messages.iter().take(limit).cloned().collect())
        }
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    #[tokio::test]
    async fn ingests_history_oldest_first_and_skips_known_messages() {
        let tracker = Arc::new(ActivityTracker::new(
            Arc::new(InMemoryActivityStore::default()),
            ActivityHours::default(),
        ));
        tracker
            .record_message(MessageRecord::new("m1", "u1", "1", day(0)))
            .await
            .expect("live message");

        // Newest first, as the platform returns them, split over two channels.
        let history = FixedHistory {
            channels: HashMap::from([
                (
                    1,
                    vec![
                        MessageRecord::new("m4", "u1", "1", day(3)),
                        MessageRecord::new("m2", "u1", "1", day(1)),
                        MessageRecord::new("m1", "u1", "1", day(0)),
                    ],
                ),
                (2, vec![MessageRecord::new("m3", "u1", "2", day(2))]),
            ]),
        };

        let backfiller = Backfiller::new(tracker.clone(), Arc::new(history), 100);
        let report = backfiller.run_once().await.expect("backfill should succeed");

        assert_eq!(report.channels, 3);
        assert_eq!(report.scanned, 4);
        assert_eq!(report.ingested, 3);

        let stats = tracker
            .user_report("u1")
            .await
            .expect("report")
            .expect("user exists")
            .stats;
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.streak, 4);
        assert_eq!(stats.best_streak, 4);
    }

    #[tokio::test]
    async fn failed_message_does_not_stop_the_rest() {
        let tracker = ActivityTracker::new(
            Arc::new(RejectingStore {
                inner: InMemoryActivityStore::default(),
                rejected: "m2",
            }),
            ActivityHours::default(),
        );
        let messages = vec![
            MessageRecord::new("m3", "u1", "1", day(2)),
            MessageRecord::new("m2", "u1", "1", day(1)),
            MessageRecord::new("m1", "u1", "1", day(0)),
            MessageRecord::new("m4", "u2", "1", day(3)),
        ];

        let tally = ingest_in_order(&tracker, messages).await;

        assert_eq!(
            tally,
            IngestTally {
                ingested: 3,
                failed: 1
            }
        );
        let u1 = tracker
            .user_report("u1")
            .await
            .expect("report")
            .expect("user exists")
            .stats;
        assert_eq!(u1.total_messages, 2);
        assert!(tracker.user_report("u2").await.expect("report").is_some());
    }
}
