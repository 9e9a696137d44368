use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One merged interval of contiguous jank frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowFrameRecord {
    pub start_timestamp_nanos: i64,
    pub duration_nanos: i64,
}

impl SlowFrameRecord {
    pub fn new(start_timestamp_nanos: i64, duration_nanos: i64) -> Self {
        Self { start_timestamp_nanos, duration_nanos }
    }

    pub fn end_nanos(&self) -> i64 {
        self.start_timestamp_nanos.saturating_add(self.duration_nanos)
    }
}

/// Accumulated UI slowness of one view.
///
/// `slow_frames_duration_nanos <= total_frames_duration_nanos` always holds:
/// every duration added to the former was added to the latter first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowFramesReport {
    pub records: VecDeque<SlowFrameRecord>,
    pub slow_frames_duration_nanos: i64,
    pub total_frames_duration_nanos: i64,
    /// Jank frames classified as frozen and kept out of `records`.
    pub ignored_frozen_frames: u32,
    /// Intervals evicted because `records` hit the cap (oldest go first).
    pub evicted_records: u32,
    /// Long-task time at or above the ANR threshold.
    pub anr_duration_nanos: i64,
    pub view_created_at_nanos: i64,
}

impl SlowFramesReport {
    pub fn new(view_created_at_nanos: i64) -> Self {
        Self { view_created_at_nanos, ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.slow_frames_duration_nanos == 0 && self.total_frames_duration_nanos == 0
    }

    pub fn slow_frames_rate(&self) -> f64 {
        if self.total_frames_duration_nanos <= 0 {
            return 0.0;
        }
        self.slow_frames_duration_nanos as f64 / self.total_frames_duration_nanos as f64
    }

    pub fn anr_duration_ratio(&self, view_end_nanos: i64, min_view_lifetime_nanos: i64) -> f64 {
        let lifetime = view_end_nanos.saturating_sub(self.view_created_at_nanos);
        if lifetime <= 0 || lifetime < min_view_lifetime_nanos {
            return 0.0;
        }
        self.anr_duration_nanos as f64 / lifetime as f64
    }

    pub(crate) fn push_capped(&mut self, record: SlowFrameRecord, max_records: usize) {
        while self.records.len() >= max_records.max(1) {
            self.records.pop_front();
            self.evicted_records = self.evicted_records.saturating_add(1);
        }
        self.records.push_back(record);
    }
}
