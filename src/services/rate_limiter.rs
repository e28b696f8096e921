use crate::constants::rate_limit;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-window admission control keyed by operator identity.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Vec<Instant>>>,
    checks: Arc<AtomicU64>,
    window: Duration,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            checks: Arc::new(AtomicU64::new(0)),
            window,
            max_requests,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn is_allowed(&self, identity: &str) -> bool {
        self.is_allowed_at(identity, Instant::now())
    }

    pub fn is_allowed_at(&self, identity: &str, now: Instant) -> bool {
        if self.checks.fetch_add(1, Ordering::Relaxed) % rate_limit::SWEEP_EVERY == 0 {
            self.sweep_at(now);
        }
        let mut entry = self.windows.entry(identity.to_string()).or_default();
        prune(&mut entry, now, self.window);
        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push(now);
        true
    }

    pub fn remaining(&self, identity: &str) -> usize {
        self.remaining_at(identity, Instant::now())
    }

    pub fn remaining_at(&self, identity: &str, now: Instant) -> usize {
        let used = match self.windows.get_mut(identity) {
            Some(mut entry) => {
                prune(&mut entry, now, self.window);
                entry.len()
            }
            None => return self.max_requests,
        };
        if used == 0 {
            self.windows.remove_if(identity, |_, timestamps| timestamps.is_empty());
        }
        self.max_requests.saturating_sub(used)
    }

    /// Time until the oldest request in the window expires.
    pub fn retry_after(&self, identity: &str) -> Duration {
        let now = Instant::now();
        let oldest = match self.windows.get_mut(identity) {
            Some(mut entry) => {
                prune(&mut entry, now, self.window);
                entry.first().copied()
            }
            None => return Duration::ZERO,
        };
        match oldest {
            Some(oldest) => (oldest + self.window).saturating_duration_since(now),
            None => {
                self.windows.remove_if(identity, |_, timestamps| timestamps.is_empty());
                Duration::ZERO
            }
        }
    }

    /// Drops every identity whose window has fully expired.
    pub fn sweep_at(&self, now: Instant) {
        self.windows.retain(|_, timestamps| {
            prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
    }

    /// Number of identities currently holding a window.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(rate_limit::WINDOW_MS),
            rate_limit::MAX_REQUESTS,
        )
    }
}

fn prune(timestamps: &mut Vec<Instant>, now: Instant, window: Duration) {
    timestamps.retain(|ts| now.saturating_duration_since(*ts) < window);
}
