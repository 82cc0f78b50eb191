use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-key suppression window.
///
/// Each started key holds an expiry instant; the key is "cooling" until
/// that instant passes. Expired entries are pruned lazily on every call, so
/// no timers are involved and callers pass `now` explicitly.
///
/// Used for the per-label accept debounce and for per-reason telemetry
/// rate limiting.
#[derive(Debug, Clone)]
pub struct CooldownMap {
    window: Duration,
    expiries: HashMap<String, Instant>,
}

impl CooldownMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            expiries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True when `key` was started less than one window before `now`.
    pub fn is_cooling(&mut self, key: &str, now: Instant) -> bool {
        self.prune(now);
        self.expiries.contains_key(key)
    }

    /// Start the window for `key` unless it is already cooling.
    /// Returns whether the caller may proceed.
    pub fn try_start(&mut self, key: &str, now: Instant) -> bool {
        if self.is_cooling(key, now) {
            tracing::trace!(key, "suppressed by cooldown");
            return false;
        }
        self.expiries.insert(key.to_string(), now + self.window);
        true
    }

    /// Lift the window for `key` early.
    pub fn clear(&mut self, key: &str) {
        self.expiries.remove(key);
    }

    /// Drop every entry whose expiry is at or before `now`.
    pub fn prune(&mut self, now: Instant) {
        self.expiries.retain(|_, expiry| *expiry > now);
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn test_first_start_allowed() {
        let mut cd = CooldownMap::new(WINDOW);
        let now = Instant::now();
        assert!(cd.try_start("alice", now));
        assert!(cd.is_cooling("alice", now));
    }

    #[test]
    fn test_repeat_within_window_suppressed() {
        let mut cd = CooldownMap::new(WINDOW);
        let t0 = Instant::now();
        assert!(cd.try_start("alice", t0));
        assert!(!cd.try_start("alice", t0 + Duration::from_secs(9)));
    }

    #[test]
    fn test_expires_after_window() {
        let mut cd = CooldownMap::new(WINDOW);
        let t0 = Instant::now();
        cd.try_start("alice", t0);
        assert!(!cd.is_cooling("alice", t0 + WINDOW));
        assert!(cd.is_empty(), "expired entries are pruned");
        assert!(cd.try_start("alice", t0 + WINDOW));
    }

    #[test]
    fn test_independent_per_key() {
        let mut cd = CooldownMap::new(WINDOW);
        let now = Instant::now();
        assert!(cd.try_start("alice", now));
        // bob is unaffected
        assert!(cd.try_start("bob", now));
        assert_eq!(cd.len(), 2);
    }

    #[test]
    fn test_clear_allows_retry() {
        let mut cd = CooldownMap::new(WINDOW);
        let now = Instant::now();
        cd.try_start("alice", now);
        cd.clear("alice");
        assert!(cd.try_start("alice", now + Duration::from_millis(200)));
    }
}
