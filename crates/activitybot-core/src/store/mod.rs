mod in_memory;
mod sqlite;

use std::{cmp::Ordering, collections::HashMap, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    stats::ActivityHours,
    types::{
        ActivityPattern, Badge, EarnedBadge, MessageRecord, RecordOutcome, ResetSummary, UserStats,
    },
};

pub use in_memory::InMemoryActivityStore;
pub use sqlite::SqliteActivityStore;

/// Persistent home of users, messages, activity buckets and badge grants.
///
/// Every write method is a single unit of work: it either applies completely
/// or leaves the store untouched.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Inserts catalog entries that are not present yet, matched by name.
    async fn seed_badges(&self, catalog: &[Badge]) -> anyhow::Result<()>;

    async fn badge_catalog(&self) -> anyhow::Result<Vec<Badge>>;

    /// Ingests a message: dedup by message id, stats update, activity bucket,
    /// badge grants. Returns `None` when the message id was already stored.
    async fn record_message(
        &self,
        message: MessageRecord,
        hours: &ActivityHours,
    ) -> anyhow::Result<Option<RecordOutcome>>;

    /// Bumps the reaction count of a stored message. `false` if unknown.
    async fn record_reaction(&self, message_id: &str) -> anyhow::Result<bool>;

    async fn message(&self, message_id: &str) -> anyhow::Result<Option<MessageRecord>>;

    async fn user_stats(&self, user_id: &str) -> anyhow::Result<Option<UserStats>>;

    /// Earned badges in earn order.
    async fn user_badges(&self, user_id: &str) -> anyhow::Result<Vec<EarnedBadge>>;

    async fn activity_patterns(&self, user_id: &str) -> anyhow::Result<Vec<ActivityPattern>>;

    /// All users in leaderboard order, see [`rank_order`].
    async fn ranked_users(&self) -> anyhow::Result<Vec<UserStats>>;

    /// Badge glyphs per user id, in earn order.
    async fn badge_glyphs(&self) -> anyhow::Result<HashMap<String, Vec<String>>>;

    async fn message_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashMap<String, i64>>;

    /// Deletes users, messages, activity buckets and grants. The catalog stays.
    async fn reset(&self) -> anyhow::Result<ResetSummary>;

    /// Writes a full copy of the store to `path`.
    async fn backup_to(&self, path: &Path) -> anyhow::Result<()>;

    /// File extension of what [`ActivityStore::backup_to`] writes.
    fn backup_extension(&self) -> &'static str;
}

/// Leaderboard ordering: most messages first, then earliest seen, then id.
pub fn rank_order(left: &UserStats, right: &UserStats) -> Ordering {
    right
        .total_messages
        .cmp(&left.total_messages)
        .then(left.first_seen_at.cmp(&right.first_seen_at))
        .then_with(|| left.user_id.cmp(&right.user_id))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::rank_order;
    use crate::types::UserStats;

    #[test]
    fn ties_break_on_first_seen_then_id() {
        let now = Utc::now();
        let mut a = UserStats::new("b", now);
        a.total_messages = 5;
        let mut b = UserStats::new("a", now + Duration::hours(1));
        b.total_messages = 5;
        let mut c = UserStats::new("a-first", now);
        c.total_messages = 5;
        let mut d = UserStats::new("z", now + Duration::days(3));
        d.total_messages = 9;

        let mut users = vec![a, b, c, d];
        users.sort_by(rank_order);
        let order = users.iter().map(|user| user.user_id.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["z", "a-first", "b", "a"]);
    }
}
