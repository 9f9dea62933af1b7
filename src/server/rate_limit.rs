//! Per-client throttling for key-exchange initiation.
//!
//! Each init costs a prime search, so clients are held to a sliding-window
//! budget keyed by IP address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Sliding-window counter for a single IP.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    /// Count in current window
    current: u32,
    /// Count in previous window
    previous: u32,
    /// Start of current window
    window_start: Instant,
}

impl WindowCounter {
    fn new(now: Instant) -> Self {
        Self {
            current: 0,
            previous: 0,
            window_start: now,
        }
    }

    /// Roll the window forward to `now`.
    fn advance(&mut self, now: Instant, window: Duration) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= window * 2 {
            self.previous = 0;
            self.current = 0;
            self.window_start = now;
        } else if elapsed >= window {
            self.previous = self.current;
            self.current = 0;
            self.window_start += window;
        }
    }

    /// Weighted request count over the last `window`.
    fn estimate(&self, now: Instant, window: Duration) -> u32 {
        let elapsed = now.duration_since(self.window_start).as_secs_f64();
        let weight = (elapsed / window.as_secs_f64()).min(1.0);
        let estimate = self.previous as f64 * (1.0 - weight) + self.current as f64;
        estimate.ceil() as u32
    }
}

/// Rate limiter using sliding window counters.
#[derive(Debug)]
pub struct RateLimiter {
    counters: Mutex<HashMap<IpAddr, WindowCounter>>,
    max_requests: u32,
    window: Duration,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            max_requests,
            window,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Record a request from `ip` if it is within budget.
    pub fn check(&self, ip: &IpAddr) -> bool {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        self.maybe_cleanup(&mut counters, now);

        let counter = counters
            .entry(*ip)
            .or_insert_with(|| WindowCounter::new(now));
        counter.advance(now, self.window);

        if counter.estimate(now, self.window) >= self.max_requests {
            return false;
        }
        counter.current += 1;
        true
    }

    /// Current weighted count for an IP.
    pub fn current_count(&self, ip: &IpAddr) -> u32 {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        match counters.get_mut(ip) {
            Some(counter) => {
                counter.advance(now, self.window);
                counter.estimate(now, self.window)
            }
            None => 0,
        }
    }

    /// Upper bound on how long a throttled client should wait.
    pub fn retry_after(&self) -> Duration {
        self.window
    }

    /// Forget an IP.
    pub fn reset(&self, ip: &IpAddr) {
        self.counters.lock().remove(ip);
    }

    /// Number of tracked IPs.
    pub fn tracked_count(&self) -> usize {
        self.counters.lock().len()
    }

    fn maybe_cleanup(&self, counters: &mut HashMap<IpAddr, WindowCounter>, now: Instant) {
        let mut last_cleanup = self.last_cleanup.lock();
        if now.duration_since(*last_cleanup) <= self.window * 2 {
            return;
        }

        let stale_after = self.window * 2;
        counters.retain(|_, counter| now.duration_since(counter.window_start) < stale_after);
        *last_cleanup = now;
    }
}
