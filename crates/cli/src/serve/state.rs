//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use hireline_engine::{Engine, MemoryFileStore};
use hireline_storage::MemoryStorage;
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request counts: (request count, window start time), plus the time
/// expired windows were last swept out.
struct IpTracker {
    windows: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Instant,
}

/// Fixed-window per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(IpTracker {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
        }
    }

    /// `Err(retry_after_secs)` once `ip` has used up the current window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut tracker = self.tracker.lock().await;

        if now.saturating_duration_since(tracker.last_sweep).as_secs() >= RATE_LIMIT_WINDOW_SECS {
            tracker.windows.retain(|_, (_, start)| {
                now.saturating_duration_since(*start).as_secs() < RATE_LIMIT_WINDOW_SECS
            });
            tracker.last_sweep = now;
        }

        let entry = tracker.windows.entry(ip).or_insert((0, now));
        let mut elapsed = now.saturating_duration_since(entry.1).as_secs();
        if elapsed >= RATE_LIMIT_WINDOW_SECS {
            *entry = (0, now);
            elapsed = 0;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(RATE_LIMIT_WINDOW_SECS.saturating_sub(elapsed).max(1))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.tracker.lock().await.windows.len()
    }
}

/// Shared across every request handler.
pub(crate) struct AppState {
    pub(crate) engine: Engine<MemoryStorage>,
    /// The same store the engine writes uploads to; serves `/files/{reference}`.
    pub(crate) files: Arc<MemoryFileStore>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) api_key: Option<String>,
}
