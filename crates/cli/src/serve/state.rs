//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use agritrace_ledger::LedgerService;
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Request count and start of the current window, per client IP.
#[derive(Default)]
struct Windows {
    by_ip: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Option<Instant>,
}

/// Fixed-window per-IP rate limiter. Windows that have expired are swept
/// at most once per window length.
pub(crate) struct RateLimiter {
    windows: Mutex<Windows>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self::with_window(max_requests, Duration::from_secs(RATE_LIMIT_WINDOW_SECS))
    }

    pub(crate) fn with_window(max_requests: u64, window: Duration) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            max_requests,
            window,
        }
    }

    /// `Err(retry_after_secs)` once `ip` is over its limit for the window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = self.window;

        if windows
            .last_sweep
            .map_or(true, |at| now.duration_since(at) >= window)
        {
            windows
                .by_ip
                .retain(|_, (_, started)| now.duration_since(*started) < window);
            windows.last_sweep = Some(now);
        }

        let (count, started) = windows.by_ip.entry(ip).or_insert((0, now));
        if now.duration_since(*started) >= window {
            *count = 0;
            *started = now;
        }

        *count += 1;
        if *count > self.max_requests {
            let left = window.saturating_sub(now.duration_since(*started));
            Err(left.as_secs().max(1))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.windows.lock().await.by_ip.len()
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) ledger: LedgerService,
    /// Per-IP rate limiter.
    pub(crate) rate_limiter: RateLimiter,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
    /// Reported by /health.
    pub(crate) chain_id: u64,
    /// Ledger store location, reported by /health.
    pub(crate) store: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_rate_limiter_blocks_after_limit() {
        let limiter = RateLimiter::new(2);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.check(ip).await.is_ok());
        assert!(limiter.check(ip).await.is_ok());
        let retry_after = limiter.check(ip).await.unwrap_err();
        assert!(retry_after <= RATE_LIMIT_WINDOW_SECS);

        // Other clients have their own window.
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        assert!(limiter.check(other).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_windows_are_evicted() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(50));
        for last in 1..=20u8 {
            let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, last));
            assert!(limiter.check(ip).await.is_ok());
        }
        assert_eq!(limiter.tracked().await, 20);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.check(ip).await.is_ok());
        assert_eq!(limiter.tracked().await, 1);

        // A fresh window admits a client that was over its limit.
        assert!(limiter.check(ip).await.is_err());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(ip).await.is_ok());
    }
}
