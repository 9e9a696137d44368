use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::report::{SlowFrameRecord, SlowFramesReport};
use crate::config::FrameConfig;
use crate::kernel::event::FrameSample;

// Superseded views are kept until resolved. Bound them in case a caller never resolves.
const MAX_RETAINED_TIMELINES: usize = 16;

/// Per-view aggregation state. Only one timeline is current at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewTimeline {
    pub view_id: String,
    pub created_at_nanos: i64,
    pub current_report: SlowFramesReport,
    pub open_interval: Option<SlowFrameRecord>,
}

impl ViewTimeline {
    fn new(view_id: String, created_at_nanos: i64) -> Self {
        Self {
            view_id,
            created_at_nanos,
            current_report: SlowFramesReport::new(created_at_nanos),
            open_interval: None,
        }
    }

    fn close_open_interval(&mut self, max_records: usize) {
        if let Some(open) = self.open_interval.take() {
            self.current_report.push_capped(open, max_records);
        }
    }
}

#[derive(Debug, Default)]
struct FrameState {
    current: Option<String>,
    timelines: HashMap<String, ViewTimeline>,
}

/// Turns the frame stream of the current view into merged slow frame intervals.
///
/// Called from whatever thread the frame collaborator runs on; every operation
/// takes the aggregator's own lock and never touches monitor state.
#[derive(Debug)]
pub struct SlowFrameAggregator {
    config: FrameConfig,
    state: Mutex<FrameState>,
}

impl SlowFrameAggregator {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            state: Mutex::new(FrameState::default()),
        }
    }

    pub fn min_view_lifetime_threshold_nanos(&self) -> i64 {
        self.config.min_view_lifetime_threshold_nanos
    }

    pub fn current_view_id(&self) -> Option<String> {
        self.state.lock().current.clone()
    }

    /// Starts a fresh timeline for `view_id`. The previous view's report stays
    /// resolvable under its own id.
    pub fn on_view_created(&self, view_id: &str, created_at_nanos: i64) {
        let max_records = self.config.max_slow_frames_amount;
        let mut state = self.state.lock();

        if let Some(previous) = state.current.take() {
            if let Some(timeline) = state.timelines.get_mut(&previous) {
                timeline.close_open_interval(max_records);
            }
        }

        // A re-created id supersedes, it never merges.
        state
            .timelines
            .insert(view_id.to_string(), ViewTimeline::new(view_id.to_string(), created_at_nanos));
        state.current = Some(view_id.to_string());

        if state.timelines.len() > MAX_RETAINED_TIMELINES {
            evict_oldest_superseded(&mut state);
        }
    }

    pub fn on_frame(&self, sample: FrameSample) {
        let continuous_threshold = self.config.continuous_slow_frame_threshold_nanos;
        let frozen_threshold = self.config.frozen_frame_threshold_nanos;
        let max_records = self.config.max_slow_frames_amount;

        let mut state = self.state.lock();
        let FrameState { current, timelines } = &mut *state;
        let Some(timeline) = current.as_ref().and_then(|id| timelines.get_mut(id)) else {
            return;
        };

        let duration = sample.duration_nanos.max(0);
        let report = &mut timeline.current_report;
        report.total_frames_duration_nanos = report.total_frames_duration_nanos.saturating_add(duration);

        if !sample.is_jank {
            return;
        }

        // 1. Contiguous with the open interval: merge, capped below frozen
        if let Some(open) = timeline.open_interval.as_mut() {
            let gap = sample.start_nanos.saturating_sub(open.end_nanos());
            if gap <= continuous_threshold {
                open.duration_nanos = open.duration_nanos.saturating_add(duration).min(frozen_threshold - 1);
                report.slow_frames_duration_nanos = report.slow_frames_duration_nanos.saturating_add(duration);
                return;
            }
        }

        // 2. Frozen on its own: not a slow frame at all
        if duration >= frozen_threshold {
            report.ignored_frozen_frames = report.ignored_frozen_frames.saturating_add(1);
            return;
        }

        // 3. New interval
        if let Some(open) = timeline.open_interval.take() {
            report.push_capped(open, max_records);
        }
        timeline.open_interval = Some(SlowFrameRecord::new(sample.start_nanos, duration));
        report.slow_frames_duration_nanos = report.slow_frames_duration_nanos.saturating_add(duration);
    }

    /// Drains the report of `view_id`. A second call returns an empty report
    /// until new frames arrive for that view.
    pub fn resolve_report(&self, view_id: &str) -> SlowFramesReport {
        let max_records = self.config.max_slow_frames_amount;
        let mut state = self.state.lock();
        let is_current = state.current.as_deref() == Some(view_id);

        let Some(timeline) = state.timelines.get_mut(view_id) else {
            debug!("No slow frame timeline for view {}", view_id);
            return SlowFramesReport::default();
        };

        timeline.close_open_interval(max_records);
        let created_at = timeline.created_at_nanos;
        let report = std::mem::replace(&mut timeline.current_report, SlowFramesReport::new(created_at));

        if !is_current {
            state.timelines.remove(view_id);
        }
        report
    }

    /// Slow frame rate of the current view; 0.0 for views younger than the
    /// minimum lifetime or without any frame.
    pub fn slow_frames_rate(&self, now_nanos: i64) -> f64 {
        self.with_current(0.0, |timeline| {
            let lifetime = now_nanos.saturating_sub(timeline.created_at_nanos);
            if lifetime < self.config.min_view_lifetime_threshold_nanos {
                return 0.0;
            }
            timeline.current_report.slow_frames_rate()
        })
    }

    pub fn on_add_long_task(&self, duration_nanos: i64) {
        if duration_nanos < self.config.anr_duration_threshold_nanos {
            return;
        }
        let mut state = self.state.lock();
        let FrameState { current, timelines } = &mut *state;
        if let Some(timeline) = current.as_ref().and_then(|id| timelines.get_mut(id)) {
            let report = &mut timeline.current_report;
            report.anr_duration_nanos = report.anr_duration_nanos.saturating_add(duration_nanos);
        }
    }

    pub fn anr_duration_ratio(&self, view_end_nanos: i64) -> f64 {
        self.with_current(0.0, |timeline| {
            timeline
                .current_report
                .anr_duration_ratio(view_end_nanos, self.config.min_view_lifetime_threshold_nanos)
        })
    }

    fn with_current<R>(&self, default: R, f: impl FnOnce(&ViewTimeline) -> R) -> R {
        let state = self.state.lock();
        match state.current.as_ref().and_then(|id| state.timelines.get(id)) {
            Some(timeline) => f(timeline),
            None => default,
        }
    }
}

fn evict_oldest_superseded(state: &mut FrameState) {
    let oldest = state
        .timelines
        .values()
        .filter(|t| state.current.as_deref() != Some(t.view_id.as_str()))
        .min_by_key(|t| t.created_at_nanos)
        .map(|t| t.view_id.clone());
    if let Some(view_id) = oldest {
        debug!("Evicting unresolved slow frame timeline of view {}", view_id);
        state.timelines.remove(&view_id);
    }
}
