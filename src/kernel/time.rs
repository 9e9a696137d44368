use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const NANOS_PER_MS: i64 = 1_000_000;

/// Monotonic event time. `nanos` only ever moves forward for a given provider;
/// `wall_ms` is the matching wall clock reading used in emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EventTime {
    pub nanos: i64,
    pub wall_ms: i64,
}

impl EventTime {
    pub fn new(nanos: i64, wall_ms: i64) -> Self {
        Self { nanos, wall_ms }
    }

    pub fn elapsed_since(&self, earlier: EventTime) -> i64 {
        self.nanos.saturating_sub(earlier.nanos)
    }
}

/// Source of time for every component that reasons about windows or lifetimes.
pub trait TimeProvider: Send + Sync {
    fn now_nanos(&self) -> i64;
    fn wall_clock_ms(&self) -> i64;

    fn now(&self) -> EventTime {
        EventTime::new(self.now_nanos(), self.wall_clock_ms())
    }
}

/// Process clock: `Instant` for monotonic time, `SystemTime` for wall time.
#[derive(Debug)]
pub struct SystemTimeProvider {
    origin: Instant,
}

impl SystemTimeProvider {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for SystemTimeProvider {
    fn now_nanos(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn wall_clock_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Hand-driven clock. Wall time follows monotonic time from a fixed epoch.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    nanos: AtomicI64,
    wall_origin_ms: i64,
}

impl ManualTimeProvider {
    pub fn new(wall_origin_ms: i64) -> Self {
        Self {
            nanos: AtomicI64::new(0),
            wall_origin_ms,
        }
    }

    pub fn advance_nanos(&self, delta: i64) {
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: i64) {
        self.advance_nanos(delta.saturating_mul(NANOS_PER_MS));
    }

    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn wall_clock_ms(&self) -> i64 {
        self.wall_origin_ms + self.now_nanos() / NANOS_PER_MS
    }
}
