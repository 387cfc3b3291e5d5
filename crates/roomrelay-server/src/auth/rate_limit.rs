//! Sliding-window limiter for connection attempts.
//!
//! Counts attempts per remote IP over a rolling window; attempts beyond the
//! limit are refused before any token verification happens.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// A rate limiter with a per-IP attempt budget and window duration.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum attempts allowed within the window. `0` disables limiting.
    max_attempts: u32,
    /// Duration of the sliding window.
    window: Duration,
    /// Per-IP attempt timestamps.
    entries: HashMap<IpAddr, Vec<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// * `max_attempts` - Maximum allowed attempts within the window, `0` for unlimited.
    /// * `window_secs` - Window duration in seconds.
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_secs),
            entries: HashMap::new(),
        }
    }

    /// Check if an attempt from `ip` is allowed, and record it if so.
    pub fn check_and_record(&mut self, ip: IpAddr) -> bool {
        self.check_and_record_at(ip, Instant::now())
    }

    fn check_and_record_at(&mut self, ip: IpAddr, now: Instant) -> bool {
        if self.max_attempts == 0 {
            return true;
        }

        let attempts = self.entries.entry(ip).or_default();
        attempts.retain(|t| now.duration_since(*t) < self.window);

        if attempts.len() as u32 >= self.max_attempts {
            return false;
        }

        attempts.push(now);
        true
    }

    /// Garbage-collect expired entries to prevent memory growth.
    pub fn gc(&mut self) {
        let now = Instant::now();
        let window = self.window;

        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < window);
            !attempts.is_empty()
        });
    }

    /// Number of IPs currently tracked.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP_A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const IP_B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn limits_per_ip() {
        let mut limiter = RateLimiter::new(2, 60);
        assert!(limiter.check_and_record(IP_A));
        assert!(limiter.check_and_record(IP_A));
        assert!(!limiter.check_and_record(IP_A));
        assert!(limiter.check_and_record(IP_B));
    }

    #[test]
    fn window_expires() {
        let mut limiter = RateLimiter::new(1, 60);
        let start = Instant::now();
        assert!(limiter.check_and_record_at(IP_A, start));
        assert!(!limiter.check_and_record_at(IP_A, start + Duration::from_secs(30)));
        assert!(limiter.check_and_record_at(IP_A, start + Duration::from_secs(61)));
    }

    #[test]
    fn zero_disables() {
        let mut limiter = RateLimiter::new(0, 60);
        for _ in 0..100 {
            assert!(limiter.check_and_record(IP_A));
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn gc_drops_idle_ips() {
        let mut limiter = RateLimiter::new(5, 0);
        limiter.check_and_record(IP_A);
        limiter.gc();
        assert_eq!(limiter.tracked(), 0);
    }
}
