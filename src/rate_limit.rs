use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Idle keys are swept after this many checks.
const SWEEP_EVERY: usize = 1024;

struct Hits {
    window: Duration,
    at: VecDeque<Instant>,
}

impl Hits {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.at.front() {
            if now.duration_since(*front) >= self.window { self.at.pop_front(); } else { break; }
        }
    }
}

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Hits>>,
    checks: Arc<AtomicUsize>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicUsize::new(0)), enabled }
    }

    /// Records a hit for `key` and returns false once `limit` hits fall inside `window`.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        let now = Instant::now();
        let mut hits = self.store.entry(key.to_string()).or_insert_with(|| Hits { window, at: VecDeque::new() });
        hits.window = window;
        hits.prune(now);
        if hits.at.len() < limit {
            hits.at.push_back(now);
            true
        } else {
            false
        }
    }

    /// Forget keys with no hit left inside their window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.store.retain(|_, hits| {
            hits.prune(now);
            !hits.at.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

/// Per-action limits for the anonymous write endpoints.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub post_limit: usize,
    pub post_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub vote_limit: usize,
    pub vote_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            post_limit: 5,
            post_window: Duration::from_secs(300),
            comment_limit: 20,
            comment_window: Duration::from_secs(60),
            vote_limit: 120,
            vote_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            post_limit: usize_env("RL_POST_LIMIT", d.post_limit),
            post_window: dur_env("RL_POST_WINDOW", d.post_window),
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
            vote_limit: usize_env("RL_VOTE_LIMIT", d.vote_limit),
            vote_window: dur_env("RL_VOTE_WINDOW", d.vote_window),
        }
    }
}

/// High level guard used by handlers; keys are client addresses.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_post(&self, ip: &str) -> bool { self.limiter.check(&format!("post:{ip}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_comment(&self, ip: &str) -> bool { self.limiter.check(&format!("comment:{ip}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_vote(&self, ip: &str) -> bool { self.limiter.check(&format!("vote:{ip}"), self.cfg.vote_limit, self.cfg.vote_window) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
        std::thread::sleep(Duration::from_millis(60));
        assert!(rl.check("k", 3, window));
    }

    #[test]
    fn actions_are_limited_independently() {
        let cfg = RateLimitConfig { post_limit: 1, ..RateLimitConfig::default() };
        let facade = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        assert!(facade.allow_post("10.0.0.1"));
        assert!(!facade.allow_post("10.0.0.1"));
        assert!(facade.allow_post("10.0.0.2"));
        assert!(facade.allow_vote("10.0.0.1"));
    }

    #[test]
    fn sweep_drops_idle_keys_only() {
        let rl = InMemoryRateLimiter::new(true);
        assert!(rl.check("10.0.0.1", 5, Duration::from_millis(20)));
        assert!(rl.check("10.0.0.2", 5, Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(30));
        rl.sweep();
        assert_eq!(rl.tracked_keys(), 1);
        // the surviving key kept its history
        for _ in 0..4 { assert!(rl.check("10.0.0.2", 5, Duration::from_secs(60))); }
        assert!(!rl.check("10.0.0.2", 5, Duration::from_secs(60)));
    }

    #[test]
    fn sweep_runs_on_its_own() {
        let rl = InMemoryRateLimiter::new(true);
        for i in 0..SWEEP_EVERY - 1 {
            rl.check(&format!("client-{i}"), 1, Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(5));
        rl.check("last", 1, Duration::from_secs(60));
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..10 { assert!(rl.check("k", 1, Duration::from_secs(60))); }
    }
}
