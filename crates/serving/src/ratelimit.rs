//! Per-user sliding-window rate limiting.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use parlance_domain::config::RateLimitConfig;
use parlance_domain::events::RateWindowStats;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Round a wait up to whole seconds for the Retry-After header, never
/// less than one.
pub fn retry_after_secs(wait: Duration) -> u64 {
    (wait.as_secs_f64().ceil() as u64).max(1)
}

// ── one sliding window ───────────────────────────────────────────────

struct Window {
    span: Duration,
    capacity: u64,
    entries: VecDeque<(Instant, u64)>,
}

impl Window {
    fn new(span: Duration, capacity: u64) -> Self {
        Window {
            span,
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some((ts, _)) = self.entries.front() {
            if now.duration_since(*ts) >= self.span {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u64 {
        self.entries.iter().map(|(_, amount)| amount).sum()
    }

    fn would_admit(&self, amount: u64) -> bool {
        self.used() + amount <= self.capacity
    }

    /// How long until `amount` fits, assuming no new traffic. Walks the
    /// window oldest-first until enough has aged out.
    fn wait_for(&self, now: Instant, amount: u64) -> Duration {
        let used = self.used();
        if used + amount <= self.capacity {
            return Duration::ZERO;
        }
        let mut freed = 0;
        for (ts, recorded) in &self.entries {
            freed += recorded;
            if used - freed + amount <= self.capacity {
                return (*ts + self.span).saturating_duration_since(now);
            }
        }
        self.entries
            .front()
            .map(|(ts, _)| (*ts + self.span).saturating_duration_since(now))
            .unwrap_or(self.span)
    }

    fn record(&mut self, now: Instant, amount: u64) {
        self.entries.push_back((now, amount));
    }

    fn stats(&self) -> RateWindowStats {
        let used = self.used();
        RateWindowStats {
            limit: self.capacity,
            used,
            remaining: self.capacity.saturating_sub(used),
        }
    }
}

// ── per-user state ───────────────────────────────────────────────────

struct UserWindows {
    requests_min: Window,
    requests_hour: Window,
    tokens_min: Window,
}

impl UserWindows {
    fn new(cfg: &RateLimitConfig) -> Self {
        UserWindows {
            requests_min: Window::new(MINUTE, cfg.requests_per_minute),
            requests_hour: Window::new(HOUR, cfg.requests_per_hour),
            tokens_min: Window::new(MINUTE, cfg.tokens_per_minute),
        }
    }

    fn prune(&mut self, now: Instant) {
        self.requests_min.prune(now);
        self.requests_hour.prune(now);
        self.tokens_min.prune(now);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The limiter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Denied { retry_after: Duration },
}

/// Sliding-window limiter keyed by user id.
///
/// Requests are reserved at admission; token usage is recorded after the
/// fact with actual counts, while admission only consults the token
/// window against the caller's projected maximum.
pub struct RateLimiter {
    cfg: RateLimitConfig,
    users: Mutex<HashMap<String, UserWindows>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        RateLimiter {
            cfg,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Check every enabled window and, when all admit, record the
    /// request. Denials record nothing and report the longest wait.
    pub fn check_and_reserve(&self, user: &str, projected_tokens: Option<u64>) -> Admission {
        let now = Instant::now();
        let mut users = self.users.lock();
        let windows = users
            .entry(user.to_string())
            .or_insert_with(|| UserWindows::new(&self.cfg));
        windows.prune(now);

        let mut wait = Duration::ZERO;
        if self.cfg.request_limits_enabled {
            if !windows.requests_min.would_admit(1) {
                wait = wait.max(windows.requests_min.wait_for(now, 1));
            }
            if !windows.requests_hour.would_admit(1) {
                wait = wait.max(windows.requests_hour.wait_for(now, 1));
            }
        }
        if self.cfg.token_limits_enabled {
            if let Some(tokens) = projected_tokens {
                if !windows.tokens_min.would_admit(tokens) {
                    wait = wait.max(windows.tokens_min.wait_for(now, tokens));
                }
            }
        }

        if wait > Duration::ZERO {
            tracing::warn!(user, retry_after_secs = retry_after_secs(wait), "rate limit exceeded");
            return Admission::Denied { retry_after: wait };
        }
        if self.cfg.request_limits_enabled {
            windows.requests_min.record(now, 1);
            windows.requests_hour.record(now, 1);
        }
        Admission::Granted
    }

    /// Record a request without enforcement (observe-only mode).
    pub fn record_request(&self, user: &str) {
        if !self.cfg.request_limits_enabled {
            return;
        }
        let now = Instant::now();
        let mut users = self.users.lock();
        let windows = users
            .entry(user.to_string())
            .or_insert_with(|| UserWindows::new(&self.cfg));
        windows.prune(now);
        windows.requests_min.record(now, 1);
        windows.requests_hour.record(now, 1);
    }

    /// Record actual token usage once a generation finishes.
    pub fn record_tokens(&self, user: &str, tokens: u64) {
        if tokens == 0 || !self.cfg.token_limits_enabled {
            return;
        }
        let now = Instant::now();
        let mut users = self.users.lock();
        let windows = users
            .entry(user.to_string())
            .or_insert_with(|| UserWindows::new(&self.cfg));
        windows.prune(now);
        windows.tokens_min.record(now, tokens);
    }

    /// Current stats for every enabled window, keyed by window name.
    pub fn stats(&self, user: &str) -> BTreeMap<String, RateWindowStats> {
        let now = Instant::now();
        let mut users = self.users.lock();
        let windows = users
            .entry(user.to_string())
            .or_insert_with(|| UserWindows::new(&self.cfg));
        windows.prune(now);

        let mut stats = BTreeMap::new();
        if self.cfg.request_limits_enabled {
            stats.insert("requests_1min".to_string(), windows.requests_min.stats());
            stats.insert("requests_1hour".to_string(), windows.requests_hour.stats());
        }
        if self.cfg.token_limits_enabled {
            stats.insert("tokens_1min".to_string(), windows.tokens_min.stats());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn sixty_first_request_in_a_minute_is_denied() {
        let limiter = RateLimiter::new(cfg());
        for _ in 0..60 {
            assert_eq!(limiter.check_and_reserve("u", None), Admission::Granted);
        }
        match limiter.check_and_reserve("u", None) {
            Admission::Denied { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after_secs(retry_after) >= 1);
            }
            Admission::Granted => panic!("sixty-first request must be denied"),
        }
        // denial records nothing
        assert_eq!(limiter.stats("u")["requests_1min"].used, 60);
    }

    #[test]
    fn hourly_window_denies_independently() {
        let mut c = cfg();
        c.requests_per_minute = 10_000;
        c.requests_per_hour = 2;
        let limiter = RateLimiter::new(c);
        assert_eq!(limiter.check_and_reserve("u", None), Admission::Granted);
        assert_eq!(limiter.check_and_reserve("u", None), Admission::Granted);
        assert!(matches!(
            limiter.check_and_reserve("u", None),
            Admission::Denied { .. }
        ));
    }

    #[test]
    fn token_window_counts_recorded_usage_against_projections() {
        let mut c = cfg();
        c.tokens_per_minute = 100;
        let limiter = RateLimiter::new(c);

        assert_eq!(limiter.check_and_reserve("u", Some(80)), Admission::Granted);
        limiter.record_tokens("u", 80);

        assert!(matches!(
            limiter.check_and_reserve("u", Some(30)),
            Admission::Denied { .. }
        ));
        assert_eq!(limiter.check_and_reserve("u", Some(20)), Admission::Granted);
        // no projection skips the token window entirely
        assert_eq!(limiter.check_and_reserve("u", None), Admission::Granted);
    }

    #[test]
    fn users_are_limited_independently() {
        let mut c = cfg();
        c.requests_per_minute = 1;
        c.requests_per_hour = 10;
        let limiter = RateLimiter::new(c);
        assert_eq!(limiter.check_and_reserve("a", None), Admission::Granted);
        assert!(matches!(
            limiter.check_and_reserve("a", None),
            Admission::Denied { .. }
        ));
        assert_eq!(limiter.check_and_reserve("b", None), Admission::Granted);
    }

    #[test]
    fn stats_report_every_enabled_window() {
        let limiter = RateLimiter::new(cfg());
        limiter.check_and_reserve("u", None);
        limiter.check_and_reserve("u", None);
        limiter.record_tokens("u", 42);

        let stats = limiter.stats("u");
        assert_eq!(
            stats.keys().collect::<Vec<_>>(),
            vec!["requests_1hour", "requests_1min", "tokens_1min"]
        );
        assert_eq!(stats["requests_1min"].used, 2);
        assert_eq!(stats["requests_1min"].remaining, 58);
        assert_eq!(stats["tokens_1min"].used, 42);
    }

    #[test]
    fn observe_only_recording_never_denies() {
        let mut c = cfg();
        c.requests_per_minute = 1;
        let limiter = RateLimiter::new(c);
        limiter.record_request("u");
        limiter.record_request("u");
        assert_eq!(limiter.stats("u")["requests_1min"].used, 2);
    }

    #[test]
    fn disabled_request_limits_admit_everything() {
        let mut c = cfg();
        c.requests_per_minute = 1;
        c.request_limits_enabled = false;
        let limiter = RateLimiter::new(c);
        for _ in 0..5 {
            assert_eq!(limiter.check_and_reserve("u", None), Admission::Granted);
        }
        assert!(!limiter.stats("u").contains_key("requests_1min"));
    }

    #[test]
    fn entries_age_out_after_the_span() {
        let now = Instant::now();
        let mut w = Window::new(Duration::from_millis(20), 2);
        w.record(now, 2);
        assert!(!w.would_admit(1));

        std::thread::sleep(Duration::from_millis(30));
        w.prune(Instant::now());
        assert!(w.would_admit(2));
    }

    #[test]
    fn wait_for_points_at_the_oldest_blocking_entry() {
        let now = Instant::now();
        let mut w = Window::new(Duration::from_secs(60), 2);
        w.record(now, 1);
        w.record(now, 1);
        let wait = w.wait_for(now, 1);
        assert!(wait > Duration::from_secs(59));
        assert!(wait <= Duration::from_secs(60));
    }
}
