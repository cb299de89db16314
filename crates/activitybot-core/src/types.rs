use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate engagement record, one per chat participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub total_messages: i64,
    pub streak: i64,
    pub best_streak: i64,
    pub night_owl_messages: i64,
    pub early_bird_messages: i64,
    pub weekend_messages: i64,
    pub weekday_messages: i64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
}

impl UserStats {
    pub fn new(user_id: impl Into<String>, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            total_messages: 0,
            streak: 0,
            best_streak: 0,
            night_owl_messages: 0,
            early_bird_messages: 0,
            weekend_messages: 0,
            weekday_messages: 0,
            last_active_at: None,
            first_seen_at,
        }
    }

    pub fn counter(&self, counter: ActivityCounter) -> i64 {
        match counter {
            ActivityCounter::NightOwl => self.night_owl_messages,
            ActivityCounter::EarlyBird => self.early_bird_messages,
            ActivityCounter::Weekend => self.weekend_messages,
        }
    }

    /// Percentage of `total_messages` that `count` represents, 0 for an empty record.
    pub fn share_of_total(&self, count: i64) -> f64 {
        if self.total_messages <= 0 {
            return 0.0;
        }
        count as f64 * 100.0 / self.total_messages as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCounter {
    NightOwl,
    EarlyBird,
    Weekend,
}

impl ActivityCounter {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityCounter::NightOwl => "night_owl",
            ActivityCounter::EarlyBird => "early_bird",
            ActivityCounter::Weekend => "weekend",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "night_owl" => Some(ActivityCounter::NightOwl),
            "early_bird" => Some(ActivityCounter::EarlyBird),
            "weekend" => Some(ActivityCounter::Weekend),
            _ => None,
        }
    }
}

/// A tracked inbound message, unique by platform message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub timestamp: DateTime<Utc>,
    pub reaction_count: i64,
    pub reply_count: i64,
}

impl MessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            timestamp,
            reaction_count: 0,
            reply_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BadgeRequirement {
    Percentage {
        counter: ActivityCounter,
        threshold: f64,
    },
    Streak {
        days: i64,
    },
}

impl BadgeRequirement {
    pub fn kind(&self) -> &'static str {
        match self {
            BadgeRequirement::Percentage { .. } => "percentage",
            BadgeRequirement::Streak { .. } => "streak",
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            BadgeRequirement::Percentage { threshold, .. } => *threshold,
            BadgeRequirement::Streak { days } => *days as f64,
        }
    }

    pub fn counter(&self) -> Option<ActivityCounter> {
        match self {
            BadgeRequirement::Percentage { counter, .. } => Some(*counter),
            BadgeRequirement::Streak { .. } => None,
        }
    }

    /// Rebuilds a requirement from its stored columns.
    pub fn from_columns(kind: &str, counter: Option<&str>, value: f64) -> Option<Self> {
        match kind {
            "percentage" => Some(BadgeRequirement::Percentage {
                counter: ActivityCounter::parse(counter?)?,
                threshold: value,
            }),
            "streak" => Some(BadgeRequirement::Streak {
                days: value.round() as i64,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub name: String,
    pub description: String,
    pub emoji: String,
    pub requirement: BadgeRequirement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnedBadge {
    pub badge: Badge,
    pub earned_at: DateTime<Utc>,
}

/// Message count for one (hour, weekday) bucket. `weekday` is 0 for Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPattern {
    pub hour: u32,
    pub weekday: u32,
    pub message_count: i64,
}

/// Result of ingesting a message that was not seen before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub stats: UserStats,
    pub created_user: bool,
    pub new_badges: Vec<Badge>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    pub users: u64,
    pub messages: u64,
    pub activity_patterns: u64,
    pub user_badges: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReport {
    pub stats: UserStats,
    pub badges: Vec<EarnedBadge>,
    pub patterns: Vec<ActivityPattern>,
}

impl UserReport {
    /// Hour of day with the most messages, earliest hour on ties.
    pub fn peak_hour(&self) -> Option<u32> {
        let mut per_hour = [0_i64; 24];
        for pattern in &self.patterns {
            if let Some(slot) = per_hour.get_mut(pattern.hour as usize) {
                *slot += pattern.message_count;
            }
        }
        per_hour
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .max_by(|(left_hour, left), (right_hour, right)| {
                left.cmp(right).then(right_hour.cmp(left_hour))
            })
            .map(|(hour, _)| hour as u32)
    }
}
