//! Monotonic time source and per-recording offset model.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never decreases.
    fn now_ms(&self) -> u64;
}

/// Process-local monotonic clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Lazily bound recording start.
///
/// The start instant is captured at most once; every offset is measured
/// against it, so code and selection events share one timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetClock {
    start: Option<u64>,
}

impl OffsetClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the start to `now` if it is not bound yet.
    ///
    /// Returns true if this call bound it.
    pub fn bind(&mut self, now_ms: u64) -> bool {
        if self.start.is_some() {
            return false;
        }
        self.start = Some(now_ms);
        true
    }

    /// Elapsed milliseconds since start, binding the start first if needed.
    pub fn offset(&mut self, now_ms: u64) -> u64 {
        self.bind(now_ms);
        self.start.map_or(0, |start| now_ms.saturating_sub(start))
    }

    pub fn start(&self) -> Option<u64> {
        self.start
    }
}
