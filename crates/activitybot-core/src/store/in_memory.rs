use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::{
    badges,
    stats::{ActivityHours, update_user_stats},
    types::{
        ActivityPattern, Badge, EarnedBadge, MessageRecord, RecordOutcome, ResetSummary,
        UserStats,
    },
};

use super::{ActivityStore, rank_order};

#[derive(Debug, Default)]
struct State {
    catalog: Vec<Badge>,
    users: HashMap<String, UserStats>,
    messages: HashMap<String, MessageRecord>,
    /// Keyed by (user id, hour, weekday).
    patterns: HashMap<(String, u32, u32), i64>,
    grants: HashMap<String, Vec<EarnedBadge>>,
}

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    state: RwLock<State>,
}

#[derive(Serialize)]
struct Snapshot<'a> {
    badges: &'a [Badge],
    users: Vec<&'a UserStats>,
    messages: Vec<&'a MessageRecord>,
    patterns: Vec<(&'a str, ActivityPattern)>,
    grants: &'a HashMap<String, Vec<EarnedBadge>>,
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn seed_badges(&self, catalog: &[Badge]) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        for badge in catalog {
            if !state.catalog.iter().any(|known| known.name == badge.name) {
                state.catalog.push(badge.clone());
            }
        }
        Ok(())
    }

    async fn badge_catalog(&self) -> anyhow::Result<Vec<Badge>> {
        Ok(self.state.read().await.catalog.clone())
    }

    async fn record_message(
        &self,
        message: MessageRecord,
        hours: &ActivityHours,
    ) -> anyhow::Result<Option<RecordOutcome>> {
        let mut state = self.state.write().await;
        if state.messages.contains_key(&message.message_id) {
            return Ok(None);
        }

        let created_user = !state.users.contains_key(&message.user_id);
        let mut stats = state
            .users
            .get(&message.user_id)
            .cloned()
            .unwrap_or_else(|| UserStats::new(message.user_id.clone(), message.timestamp));
        update_user_stats(&mut stats, message.timestamp, hours);

        let held = state
            .grants
            .get(&message.user_id)
            .map(|earned| {
                earned
                    .iter()
                    .map(|grant| grant.badge.name.clone())
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();
        let new_badges = badges::evaluate(&stats, &state.catalog, &held);

        let bucket = (
            message.user_id.clone(),
            message.timestamp.hour(),
            message.timestamp.weekday().num_days_from_monday(),
        );
        *state.patterns.entry(bucket).or_insert(0) += 1;

        let earned_at = Utc::now();
        state
            .grants
            .entry(message.user_id.clone())
            .or_default()
            .extend(new_badges.iter().cloned().map(|badge| EarnedBadge { badge, earned_at }));
        state.users.insert(message.user_id.clone(), stats.clone());
        state.messages.insert(message.message_id.clone(), message);

        Ok(Some(RecordOutcome {
            stats,
            created_user,
            new_badges,
        }))
    }

    async fn record_reaction(&self, message_id: &str) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let Some(message) = state.messages.get_mut(message_id) else {
            return Ok(false);
        };
        message.reaction_count += 1;
        Ok(true)
    }

    async fn message(&self, message_id: &str) -> anyhow::Result<Option<MessageRecord>> {
        Ok(self.state.read().await.messages.get(message_id).cloned())
    }

    async fn user_stats(&self, user_id: &str) -> anyhow::Result<Option<UserStats>> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn user_badges(&self, user_id: &str) -> anyhow::Result<Vec<EarnedBadge>> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn activity_patterns(&self, user_id: &str) -> anyhow::Result<Vec<ActivityPattern>> {
        let state = self.state.read().await;
        let mut patterns = state
            .patterns
            .iter()
            .filter(|((owner, _, _), _)| owner == user_id)
            .map(|((_, hour, weekday), count)| ActivityPattern {
                hour: *hour,
                weekday: *weekday,
                message_count: *count,
            })
            .collect::<Vec<_>>();
        patterns.sort_by_key(|pattern| (pattern.weekday, pattern.hour));
        Ok(patterns)
    }

    async fn ranked_users(&self) -> anyhow::Result<Vec<UserStats>> {
        let mut users = self
            .state
            .read()
            .await
            .users
            .values()
            .cloned()
            .collect::<Vec<_>>();
        users.sort_by(rank_order);
        Ok(users)
    }

    async fn badge_glyphs(&self) -> anyhow::Result<HashMap<String, Vec<String>>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .iter()
            .filter(|(_, earned)| !earned.is_empty())
            .map(|(user_id, earned)| {
                (
                    user_id.clone(),
                    earned.iter().map(|grant| grant.badge.emoji.clone()).collect(),
                )
            })
            .collect())
    }

    async fn message_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> anyhow::Result<HashMap<String, i64>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for message in state.messages.values().filter(|message| message.timestamp >= since) {
            *counts.entry(message.user_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn reset(&self) -> anyhow::Result<ResetSummary> {
        let mut state = self.state.write().await;
        let summary = ResetSummary {
            users: state.users.len() as u64,
            messages: state.messages.len() as u64,
            activity_patterns: state.patterns.len() as u64,
            user_badges: state.grants.values().map(|earned| earned.len() as u64).sum(),
        };
        state.users.clear();
        state.messages.clear();
        state.patterns.clear();
        state.grants.clear();
        Ok(summary)
    }

    async fn backup_to(&self, path: &Path) -> anyhow::Result<()> {
        let json = {
            let state = self.state.read().await;
            let mut users = state.users.values().collect::<Vec<_>>();
            users.sort_by(|left, right| rank_order(left, right));
            let mut messages = state.messages.values().collect::<Vec<_>>();
            messages.sort_by_key(|message| message.timestamp);
            let mut patterns = state
                .patterns
                .iter()
                .map(|((user_id, hour, weekday), count)| {
                    (
                        user_id.as_str(),
                        ActivityPattern {
                            hour: *hour,
                            weekday: *weekday,
                            message_count: *count,
                        },
                    )
                })
                .collect::<Vec<_>>();
            patterns.sort_by_key(|(user_id, pattern)| (*user_id, pattern.weekday, pattern.hour));
            serde_json::to_vec_pretty(&Snapshot {
                badges: &state.catalog,
                users,
                messages,
                patterns,
                grants: &state.grants,
            })?
        };
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
        Ok(())
    }

    fn backup_extension(&self) -> &'static str {
        "json"
    }
}
