//! Login rate limiting (spec §4.6 "Login rate limit").
//!
//! At most 5 login attempts per minute per source IP; a 6th attempt
//! responds 429. Global default cap is enforced the same way, keyed on a
//! longer window. In-process only: this is the resolved Open Question on
//! rate limiter durability (`SPEC_FULL.md` §1) — state resets on restart
//! by design, mirroring the shape of the scraper politeness
//! `RateLimitBackend` trait rather than sharing its implementation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A fixed-window-ish sliding log limiter: keeps timestamps of attempts
/// within the window and evicts stale ones on each check.
struct Window {
    attempts: Mutex<VecDeque<Instant>>,
}

impl Window {
    fn new() -> Self {
        Self {
            attempts: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `Some(retry_after)` if the limit is exceeded, else `None`
    /// and records the attempt.
    fn check_and_record(&self, limit: usize, window: Duration) -> Option<Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap();
        while let Some(front) = attempts.front() {
            if now.duration_since(*front) > window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= limit {
            let oldest = *attempts.front().unwrap();
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Some(retry_after.max(Duration::from_secs(1)));
        }
        attempts.push_back(now);
        None
    }
}

/// Per-IP login and global request rate limiter (spec §6
/// `rate_limit.login`, `rate_limit.global`).
pub struct LoginRateLimiter {
    login_windows: DashMap<String, Window>,
    hourly_windows: DashMap<String, Window>,
    daily_windows: DashMap<String, Window>,
    login_limit: usize,
    login_window: Duration,
    hourly_limit: usize,
    daily_limit: usize,
}

impl LoginRateLimiter {
    /// `login_limit`/`login_window` default to 5/minute; `hourly_limit`
    /// defaults to 50, `daily_limit` to 200 (spec §4.6).
    pub fn new(login_limit: usize, login_window: Duration, hourly_limit: usize, daily_limit: usize) -> Self {
        Self {
            login_windows: DashMap::new(),
            hourly_windows: DashMap::new(),
            daily_windows: DashMap::new(),
            login_limit,
            login_window,
            hourly_limit,
            daily_limit,
        }
    }

    pub fn default_for_spec() -> Self {
        Self::new(5, Duration::from_secs(60), 50, 200)
    }

    /// Check the login-specific limiter for `ip`. Returns `Some(retry_after)`
    /// on the 6th attempt within the window.
    pub fn check_login(&self, ip: &str) -> Option<Duration> {
        let window = self.login_windows.entry(ip.to_string()).or_insert_with(Window::new);
        window.check_and_record(self.login_limit, self.login_window)
    }

    /// Check the global per-IP caps (hourly and daily); returns the first
    /// violated window's retry-after.
    pub fn check_global(&self, ip: &str) -> Option<Duration> {
        let hourly = self.hourly_windows.entry(ip.to_string()).or_insert_with(Window::new);
        if let Some(retry) = hourly.check_and_record(self.hourly_limit, Duration::from_secs(3600)) {
            return Some(retry);
        }
        drop(hourly);
        let daily = self.daily_windows.entry(ip.to_string()).or_insert_with(Window::new);
        daily.check_and_record(self.daily_limit, Duration::from_secs(86400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_login_attempt_in_a_minute_is_rate_limited() {
        let limiter = LoginRateLimiter::default_for_spec();
        for _ in 0..5 {
            assert!(limiter.check_login("10.0.0.1").is_none());
        }
        let retry = limiter.check_login("10.0.0.1");
        assert!(retry.is_some());
        assert!(retry.unwrap() >= Duration::from_secs(1));
    }

    #[test]
    fn different_ips_have_independent_limits() {
        let limiter = LoginRateLimiter::default_for_spec();
        for _ in 0..5 {
            limiter.check_login("10.0.0.1");
        }
        assert!(limiter.check_login("10.0.0.2").is_none());
    }
}
