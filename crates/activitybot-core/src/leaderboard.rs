use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::UserStats;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Resolves a user id against the live guild membership.
pub trait MemberDirectory: Send + Sync {
    fn display_name(&self, user_id: &str) -> Option<String>;
}

impl MemberDirectory for HashMap<String, String> {
    fn display_name(&self, user_id: &str) -> Option<String> {
        self.get(user_id).cloned()
    }
}

/// Directory that knows nobody; every entry renders as unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDirectory;

impl MemberDirectory for NoDirectory {
    fn display_name(&self, _user_id: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Medal {
    Gold,
    Silver,
    Bronze,
}

impl Medal {
    pub fn for_rank(rank: usize) -> Option<Self> {
        match rank {
            1 => Some(Medal::Gold),
            2 => Some(Medal::Silver),
            3 => Some(Medal::Bronze),
            _ => None,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Medal::Gold => "🥇",
            Medal::Silver => "🥈",
            Medal::Bronze => "🥉",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub medal: Option<Medal>,
    pub user_id: String,
    /// `None` when the user is no longer a guild member.
    pub display_name: Option<String>,
    pub badge_glyphs: Vec<String>,
    pub total_messages: i64,
    pub recent_messages: i64,
    pub streak: i64,
    pub best_streak: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardPage {
    /// Zero-based page index.
    pub page: usize,
    pub total_pages: usize,
    pub total_users: usize,
    pub entries: Vec<LeaderboardEntry>,
    pub generated_at: DateTime<Utc>,
}

impl LeaderboardPage {
    pub fn display_page(&self) -> usize {
        self.page + 1
    }
}

pub fn total_pages(total_users: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total_users.div_ceil(page_size)
}

/// Everything a render needs, loaded from the store in one go.
#[derive(Debug, Clone, Default)]
pub struct LeaderboardSource {
    /// Sorted by `total_messages` descending, ties already broken.
    pub users: Vec<UserStats>,
    /// Badge glyphs per user id, in earn order.
    pub badge_glyphs: HashMap<String, Vec<String>>,
    /// Messages per user id in the trailing 24 hours.
    pub recent_counts: HashMap<String, i64>,
}

impl LeaderboardSource {
    pub fn total_pages(&self, page_size: usize) -> usize {
        total_pages(self.users.len(), page_size)
    }

    /// Projects one page. Never touches the source records.
    pub fn render(
        &self,
        page: usize,
        page_size: usize,
        directory: &dyn MemberDirectory,
        generated_at: DateTime<Utc>,
    ) -> LeaderboardPage {
        let start = page.saturating_mul(page_size);
        let entries = self
            .users
            .iter()
            .enumerate()
            .skip(start)
            .take(page_size)
            .map(|(index, user)| {
                let rank = index + 1;
                LeaderboardEntry {
                    rank,
                    medal: Medal::for_rank(rank),
                    user_id: user.user_id.clone(),
                    display_name: directory.display_name(&user.user_id),
                    badge_glyphs: self
                        .badge_glyphs
                        .get(&user.user_id)
                        .cloned()
                        .unwrap_or_default(),
                    total_messages: user.total_messages,
                    recent_messages: self.recent_counts.get(&user.user_id).copied().unwrap_or(0),
                    streak: user.streak,
                    best_streak: user.best_streak,
                }
            })
            .collect();

        LeaderboardPage {
            page,
            total_pages: self.total_pages(page_size),
            total_users: self.users.len(),
            entries,
            generated_at,
        }
    }
}
