use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use shiva_core::{ShivaError, ShivaResult};

/// Sliding-window limiter keyed by client. State is in-process only and
/// resets on restart.
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Records a hit for `key` at `now`, or fails with `RateLimited` when the
    /// window is already full. Rejected hits are not counted.
    pub fn check(&self, key: &str, now: DateTime<Utc>) -> ShivaResult<()> {
        let mut hits = self.hits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = now - self.window;

        hits.retain(|_, times| {
            while times.front().is_some_and(|t| *t <= cutoff) {
                times.pop_front();
            }
            !times.is_empty()
        });

        let times = hits.entry(key.to_string()).or_default();
        if times.len() >= self.limit {
            tracing::warn!("Rate limit hit for {}", key);
            return Err(ShivaError::RateLimited);
        }
        times.push_back(now);
        Ok(())
    }
}

/// Limits on the endpoints that fan out email.
pub struct RateLimits {
    pub update_emails: SlidingWindow,
    pub thank_you: SlidingWindow,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            update_emails: SlidingWindow::new(3, Duration::minutes(5)),
            thank_you: SlidingWindow::new(2, Duration::minutes(10)),
        }
    }
}
