use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::types::UserStats;

/// Hour-of-day sets (UTC) used to bucket messages.
///
/// The two sets are expected to be disjoint. When an hour appears in both,
/// the night-owl bucket wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityHours {
    night_owl: BTreeSet<u32>,
    early_bird: BTreeSet<u32>,
}

impl Default for ActivityHours {
    fn default() -> Self {
        Self {
            night_owl: (22..24).chain(0..4).collect(),
            early_bird: (5..9).collect(),
        }
    }
}

impl ActivityHours {
    pub fn new(night_owl: BTreeSet<u32>, early_bird: BTreeSet<u32>) -> Self {
        Self {
            night_owl,
            early_bird,
        }
    }

    pub fn night_owl(&self) -> &BTreeSet<u32> {
        &self.night_owl
    }

    pub fn early_bird(&self) -> &BTreeSet<u32> {
        &self.early_bird
    }

    pub fn classify(&self, hour: u32) -> HourBucket {
        if self.night_owl.contains(&hour) {
            HourBucket::NightOwl
        } else if self.early_bird.contains(&hour) {
            HourBucket::EarlyBird
        } else {
            HourBucket::Neither
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourBucket {
    NightOwl,
    EarlyBird,
    Neither,
}

/// What a message did to the user's streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    Started,
    Extended,
    SameDay,
    Reset,
    /// The message predates the stored last-active day; streak state is left alone.
    OutOfOrder,
}

pub fn is_weekend(timestamp: DateTime<Utc>) -> bool {
    matches!(timestamp.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Folds one message into `stats`. The caller owns persistence.
pub fn update_user_stats(
    stats: &mut UserStats,
    timestamp: DateTime<Utc>,
    hours: &ActivityHours,
) -> StreakChange {
    stats.total_messages += 1;

    let change = match stats.last_active_at {
        None => StreakChange::Started,
        Some(last) => match (timestamp.date_naive() - last.date_naive()).num_days() {
            0 => StreakChange::SameDay,
            1 => StreakChange::Extended,
            gap if gap > 1 => StreakChange::Reset,
            _ => StreakChange::OutOfOrder,
        },
    };

    match change {
        StreakChange::Started | StreakChange::Reset => stats.streak = 1,
        StreakChange::Extended => stats.streak += 1,
        StreakChange::SameDay | StreakChange::OutOfOrder => {}
    }

    if change != StreakChange::OutOfOrder {
        stats.best_streak = stats.best_streak.max(stats.streak);
        stats.last_active_at = Some(match stats.last_active_at {
            Some(last) => last.max(timestamp),
            None => timestamp,
        });
    }

    match hours.classify(timestamp.hour()) {
        HourBucket::NightOwl => stats.night_owl_messages += 1,
        HourBucket::EarlyBird => stats.early_bird_messages += 1,
        HourBucket::Neither => {}
    }

    if is_weekend(timestamp) {
        stats.weekend_messages += 1;
    } else {
        stats.weekday_messages += 1;
    }

    change
}
