use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

/// Fixed-window command budget per user.
#[derive(Debug)]
pub struct CommandRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<u64, WindowState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl CommandRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, user_id: u64) -> RateDecision {
        self.check_at(user_id, Instant::now()).await
    }

    pub async fn check_at(&self, user_id: u64, now: Instant) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Limited {
                retry_after: self.window,
            };
        }

        let mut windows = self.windows.lock().await;
        windows.retain(|_, state| now.saturating_duration_since(state.started) < self.window);
        let state = windows.entry(user_id).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }

        if state.count >= self.limit {
            let elapsed = now.saturating_duration_since(state.started);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        state.count += 1;
        RateDecision::Allowed {
            remaining: self.limit - state.count,
        }
    }

    /// Users with a window still open.
    pub async fn active_windows(&self) -> usize {
        self.windows.lock().await.len()
    }
}
