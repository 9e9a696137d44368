use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::time::{TimeProvider, NANOS_PER_MS};
use crate::config::CallRateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRateEntry {
    pub window_start_ms: i64,
    pub count: i32,
}

/// Advisory monitor for API calls made too often.
///
/// One coarse lock guards every counter so that reset, increment and check
/// happen as one step.
pub struct CallRateMonitor {
    config: CallRateConfig,
    time: Arc<dyn TimeProvider>,
    entries: Mutex<HashMap<String, CallRateEntry>>,
}

impl CallRateMonitor {
    pub fn new(config: CallRateConfig, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one call of `event_type`. Returns `true` when the call is over
    /// the threshold and a warning was logged. Every call past the threshold
    /// warns again until the window rolls over.
    pub fn track_calls_and_warn_if_necessary(&self, event_type: &str) -> bool {
        let now_ms = self.time.now_nanos() / NANOS_PER_MS;
        let count = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(event_type.to_string())
                .or_insert(CallRateEntry { window_start_ms: now_ms, count: 0 });

            if now_ms.saturating_sub(entry.window_start_ms) > self.config.time_period_ms {
                entry.window_start_ms = now_ms;
                entry.count = 0;
            }
            entry.count = entry.count.saturating_add(1);
            entry.count
        };

        if count > self.config.max_calls_threshold {
            warn!(
                target: "vigil::rate",
                event_type,
                count,
                window_ms = self.config.time_period_ms,
                "{} called more than {} times in {}ms; check for calls in a tight loop",
                event_type,
                self.config.max_calls_threshold,
                self.config.time_period_ms
            );
            return true;
        }
        false
    }

    pub fn entry(&self, event_type: &str) -> Option<CallRateEntry> {
        self.entries.lock().get(event_type).copied()
    }
}
