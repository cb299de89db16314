//! Page currently shown by each rendered leaderboard message.
//!
//! Lives for the process lifetime only: a restart forgets every entry and
//! renders fall back to page 0.

use std::collections::HashMap;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Back,
}

impl PageDirection {
    pub const FORWARD_EMOJI: &'static str = "➡️";
    pub const BACK_EMOJI: &'static str = "⬅️";

    pub fn from_emoji(emoji: &str) -> Option<Self> {
        match emoji {
            Self::FORWARD_EMOJI | "➡" => Some(PageDirection::Forward),
            Self::BACK_EMOJI | "⬅" => Some(PageDirection::Back),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PageTracker {
    pages: RwLock<HashMap<u64, usize>>,
}

impl PageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self, message_id: u64) -> usize {
        self.pages
            .read()
            .await
            .get(&message_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn contains(&self, message_id: u64) -> bool {
        self.pages.read().await.contains_key(&message_id)
    }

    pub async fn set(&self, message_id: u64, page: usize) {
        self.pages.write().await.insert(message_id, page);
    }

    pub async fn forget(&self, message_id: u64) {
        self.pages.write().await.remove(&message_id);
    }

    /// Moves `message_id` one page in `direction`, bounded by `total_pages`.
    /// Returns the new page, or `None` when already at the edge.
    pub async fn shift(
        &self,
        message_id: u64,
        direction: PageDirection,
        total_pages: usize,
    ) -> Option<usize> {
        let mut pages = self.pages.write().await;
        let current = pages.get(&message_id).copied().unwrap_or(0);
        let next = match direction {
            PageDirection::Forward if current + 1 < total_pages => current + 1,
            PageDirection::Back if current > 0 => current - 1,
            _ => return None,
        };
        pages.insert(message_id, next);
        Some(next)
    }
}
