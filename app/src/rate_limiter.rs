//! Per-user, per-provider sliding-window rate limiter.
//!
//! The original limiter tracked one global per-minute counter for a single
//! provider (Gemini). Serving more than one user means a single shared
//! counter starves every user but the first to arrive in a given minute, so
//! this is a redesign rather than a literal port: one counter per
//! `(user_id, provider)` pair, each on its own minute boundary.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

struct Window {
    minute: u64,
    count: u32,
    last_seen: SystemTime,
}

/// `check`/`reset` are the hot path; `sweep_inactive` is opportunistic
/// housekeeping, never called from inside a request.
pub struct RateLimiter {
    max_requests_per_minute: u32,
    windows: RwLock<HashMap<(String, String), Window>>,
}

fn current_minute(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).expect("system clock is before the unix epoch").as_secs() / 60
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self { max_requests_per_minute, windows: RwLock::new(HashMap::new()) }
    }

    /// Checks and records one request for `(user_id, provider)`. Returns
    /// `(allowed, current_count, remaining)`; `current_count` already
    /// includes this call when `allowed` is true.
    pub fn check(&self, user_id: &str, provider: &str) -> (bool, u32, u32) {
        let now = SystemTime::now();
        let minute = current_minute(now);
        let key = (user_id.to_string(), provider.to_string());
        let mut windows = self.windows.write().expect("rate limiter lock poisoned");

        let window = windows.entry(key).or_insert_with(|| Window { minute, count: 0, last_seen: now });
        if window.minute != minute {
            window.minute = minute;
            window.count = 0;
        }
        window.last_seen = now;

        if window.count >= self.max_requests_per_minute {
            return (false, window.count, 0);
        }

        window.count += 1;
        let remaining = self.max_requests_per_minute - window.count;
        (true, window.count, remaining)
    }

    /// Clears every window belonging to `user_id`, across all providers.
    pub fn reset(&self, user_id: &str) {
        let mut windows = self.windows.write().expect("rate limiter lock poisoned");
        windows.retain(|(uid, _), _| uid != user_id);
    }

    /// Read-only diagnostic: the busiest user's current count for
    /// `provider` in the current minute, for a status endpoint.
    pub fn get_current_status(&self, provider: &str) -> (u32, u32) {
        let now = current_minute(SystemTime::now());
        let windows = self.windows.read().expect("rate limiter lock poisoned");
        let busiest = windows
            .iter()
            .filter(|((_, p), w)| p == provider && w.minute == now)
            .map(|(_, w)| w.count)
            .max()
            .unwrap_or(0);
        (busiest, self.max_requests_per_minute)
    }

    /// Drops windows untouched for longer than `max_idle_secs`. Call this
    /// periodically from a background task, not from `check`.
    pub fn sweep_inactive(&self, max_idle_secs: u64) {
        let now = SystemTime::now();
        let mut windows = self.windows.write().expect("rate limiter lock poisoned");
        windows.retain(|_, w| now.duration_since(w.last_seen).map(|d| d.as_secs() < max_idle_secs).unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_allows_up_to_the_limit_then_blocks() {
        let limiter = RateLimiter::new(2);
        assert_eq!(limiter.check("alice", "gemini"), (true, 1, 1));
        assert_eq!(limiter.check("alice", "gemini"), (true, 2, 0));
        assert_eq!(limiter.check("alice", "gemini"), (false, 2, 0));
    }

    #[test]
    fn test_users_do_not_share_a_window() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.check("alice", "gemini").0, true);
        assert_eq!(limiter.check("bob", "gemini").0, true);
    }

    #[test]
    fn test_providers_are_independent_per_user() {
        let limiter = RateLimiter::new(1);
        assert_eq!(limiter.check("alice", "gemini").0, true);
        assert_eq!(limiter.check("alice", "gpt").0, true);
    }

    #[test]
    fn test_reset_clears_all_providers_for_user() {
        let limiter = RateLimiter::new(1);
        limiter.check("alice", "gemini");
        limiter.reset("alice");
        assert_eq!(limiter.check("alice", "gemini"), (true, 1, 0));
    }

    #[test]
    fn test_sweep_inactive_drops_stale_windows() {
        let limiter = RateLimiter::new(1);
        limiter.check("alice", "gemini");
        limiter.sweep_inactive(0);
        assert_eq!(limiter.windows.read().unwrap().len(), 0);
    }
}
