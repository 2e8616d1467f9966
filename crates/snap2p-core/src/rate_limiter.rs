//! Per-remote-address inbound rate limiting (spec §3 "Rate-limiter record":
//! "per-remote-address sliding window of recent arrival timestamps; bounded
//! by the configured window size"). `DashMap`-keyed by remote address, each
//! entry a pruned log of admitted-arrival timestamps, generalized from a
//! single global limit to the per-visibility-tier table of spec §4.8.

use crate::config::RateLimit;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A sliding-window limiter over inbound connection attempts, keyed by
/// remote IP address.
pub struct RateLimiter {
    limit: RateLimit,
    windows: DashMap<IpAddr, Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter enforcing `limit`.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: DashMap::new(),
        }
    }

    /// Record an attempt from `addr` and report whether it is allowed:
    /// prunes timestamps older than `limit.period`, then admits the attempt
    /// only if fewer than `limit.max_requests` remain in the window.
    pub fn check(&self, addr: IpAddr) -> bool {
        let entry = self.windows.entry(addr).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut log = entry.lock().expect("rate limiter mutex poisoned");
        prune(&mut log, self.limit.period);

        if log.len() >= self.limit.max_requests as usize {
            return false;
        }
        log.push_back(Instant::now());
        true
    }

    /// Drop window state for addresses with no arrivals inside the current
    /// window; bounds unbounded memory growth for a long-lived listener.
    pub fn sweep_idle(&self) {
        let period = self.limit.period;
        self.windows.retain(|_, log| {
            let mut log = log.lock().expect("rate limiter mutex poisoned");
            prune(&mut log, period);
            !log.is_empty()
        });
    }
}

/// Evict every timestamp older than `period` relative to now, from the
/// front of the log (arrivals are always pushed in non-decreasing order).
fn prune(log: &mut VecDeque<Instant>, period: Duration) {
    let now = Instant::now();
    while let Some(&oldest) = log.front() {
        if now.saturating_duration_since(oldest) >= period {
            log.pop_front();
        } else {
            break;
        }
    }
}
