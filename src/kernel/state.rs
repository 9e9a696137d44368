use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::event::{ActionType, RawEvent, RawEventKind};
use super::frames::SlowFrameAggregator;
use super::telemetry::event::{
    ActionRecord, ErrorRecord, LongTaskRecord, ResourceRecord, TelemetryMessage, TelemetryRecord, ViewRecord,
};
use super::time::{EventTime, NANOS_PER_MS};
use crate::config::{FrameConfig, SessionConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    pub session_id: Uuid,
    pub started_at: EventTime,
    pub last_interaction_at: EventTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewScope {
    pub view_id: Uuid,
    pub key: String,
    pub name: String,
    pub started_at: EventTime,
    pub document_version: u64,
    pub action_count: u64,
    pub resource_count: u64,
    pub error_count: u64,
    pub crash_count: u64,
    pub long_task_count: u64,
    pub frozen_frame_count: u64,
}

#[derive(Debug, Clone)]
struct ResourceScope {
    method: String,
    url: String,
    started_at: EventTime,
}

/// Copy of the parts of monitor state worth looking at from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub version: u64,
    pub session: Option<SessionScope>,
    pub active_view: Option<ViewScope>,
    pub open_actions: usize,
    pub open_resources: usize,
}

/// The monitor state tree.
///
/// # SINGLE WRITER
/// Only the dispatcher holds this, behind its one lock. `apply` is the ONLY
/// way it mutates, and the records it returns are the only way out.
#[derive(Debug)]
pub struct MonitorState {
    inactivity_timeout_nanos: i64,
    max_session_duration_nanos: i64,
    frozen_frame_threshold_nanos: i64,
    frames: Arc<SlowFrameAggregator>,

    session: Option<SessionScope>,
    active_view: Option<ViewScope>,
    actions: HashMap<(ActionType, String), EventTime>,
    resources: HashMap<String, ResourceScope>,

    /// Number of applied events.
    pub version: u64,
}

impl MonitorState {
    pub fn new(session_config: SessionConfig, frame_config: &FrameConfig, frames: Arc<SlowFrameAggregator>) -> Self {
        Self {
            inactivity_timeout_nanos: session_config.inactivity_timeout_ms.saturating_mul(NANOS_PER_MS),
            max_session_duration_nanos: session_config.max_duration_ms.saturating_mul(NANOS_PER_MS),
            frozen_frame_threshold_nanos: frame_config.frozen_frame_threshold_nanos,
            frames,
            session: None,
            active_view: None,
            actions: HashMap::new(),
            resources: HashMap::new(),
            version: 0,
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            version: self.version,
            session: self.session.clone(),
            active_view: self.active_view.clone(),
            open_actions: self.actions.len(),
            open_resources: self.resources.len(),
        }
    }

    pub fn active_view_names(&self) -> Vec<String> {
        self.active_view.iter().map(|v| v.name.clone()).collect()
    }

    /// Applies one event and returns the records it produced, in order.
    pub fn apply(&mut self, event: &RawEvent) -> Vec<TelemetryRecord> {
        self.version += 1;
        let time = event.time;
        let mut records = Vec::new();

        // 1. Session bookkeeping (keep-alives only check expiry)
        let is_interaction = matches!(
            event.kind,
            RawEventKind::StartView { .. } | RawEventKind::StartAction { .. }
        );
        let is_keep_alive = matches!(event.kind, RawEventKind::KeepAlive);
        self.renew_session_if_needed(time, is_interaction, !is_keep_alive, &mut records);

        // 2. The event itself
        match &event.kind {
            RawEventKind::StartView { key, name } => {
                if self.active_view.is_some() {
                    self.stop_active_view(time, &mut records);
                }
                self.start_view(key, name, time, &mut records);
            }
            RawEventKind::StopView { key } => {
                if self.active_view.as_ref().is_some_and(|v| &v.key == key) {
                    self.stop_active_view(time, &mut records);
                } else {
                    debug!("Ignoring stop for view '{}' which is not active", key);
                }
            }
            RawEventKind::StartAction { action_type, name } => {
                self.actions.insert((*action_type, name.clone()), time);
            }
            RawEventKind::StopAction { action_type, name } => {
                let Some(started_at) = self.actions.remove(&(*action_type, name.clone())) else {
                    debug!("Dropping stop for unknown action {:?} '{}'", action_type, name);
                    return records;
                };
                let (session_id, view_id) = self.ids();
                records.push(TelemetryRecord::Action(ActionRecord {
                    session_id,
                    view_id,
                    action_type: *action_type,
                    name: name.clone(),
                    date_ms: started_at.wall_ms,
                    loading_time_nanos: time.elapsed_since(started_at),
                }));
                self.update_view(time, &mut records, |v| v.action_count += 1);
            }
            RawEventKind::StartResource { key, method, url } => {
                self.resources.insert(
                    key.clone(),
                    ResourceScope { method: method.clone(), url: url.clone(), started_at: time },
                );
            }
            RawEventKind::StopResource { key, status_code, size_bytes } => {
                let Some(resource) = self.resources.remove(key) else {
                    debug!("Dropping stop for unknown resource '{}'", key);
                    return records;
                };
                let (session_id, view_id) = self.ids();
                records.push(TelemetryRecord::Resource(ResourceRecord {
                    session_id,
                    view_id,
                    method: resource.method,
                    url: resource.url,
                    status_code: *status_code,
                    size_bytes: *size_bytes,
                    date_ms: resource.started_at.wall_ms,
                    duration_nanos: time.elapsed_since(resource.started_at),
                }));
                self.update_view(time, &mut records, |v| v.resource_count += 1);
            }
            RawEventKind::AddError { message, source, stack, is_fatal, threads } => {
                let (session_id, view_id) = self.ids();
                records.push(TelemetryRecord::Error(ErrorRecord {
                    session_id,
                    view_id,
                    message: message.clone(),
                    source: *source,
                    stack: stack.clone(),
                    is_fatal: *is_fatal,
                    threads: threads.clone(),
                    date_ms: time.wall_ms,
                }));
                let fatal = *is_fatal;
                self.update_view(time, &mut records, |v| {
                    v.error_count += 1;
                    if fatal {
                        v.crash_count += 1;
                    }
                });
            }
            RawEventKind::AddFrameSample(sample) => {
                self.frames.on_frame(*sample);
            }
            RawEventKind::AddLongTask { duration_nanos, target } => {
                self.frames.on_add_long_task(*duration_nanos);
                let is_frozen_frame = *duration_nanos >= self.frozen_frame_threshold_nanos;
                let (session_id, view_id) = self.ids();
                records.push(TelemetryRecord::LongTask(LongTaskRecord {
                    session_id,
                    view_id,
                    target: target.clone(),
                    duration_nanos: *duration_nanos,
                    is_frozen_frame,
                    date_ms: time.wall_ms - duration_nanos / NANOS_PER_MS,
                }));
                self.update_view(time, &mut records, |v| {
                    v.long_task_count += 1;
                    if is_frozen_frame {
                        v.frozen_frame_count += 1;
                    }
                });
            }
            RawEventKind::SendTelemetry { level, message } => {
                records.push(TelemetryRecord::Telemetry(TelemetryMessage {
                    level: *level,
                    message: message.clone(),
                    date_ms: time.wall_ms,
                }));
            }
            RawEventKind::KeepAlive => {
                self.update_view(time, &mut records, |_| {});
            }
        }

        records
    }

    fn renew_session_if_needed(
        &mut self,
        time: EventTime,
        is_interaction: bool,
        may_create: bool,
        records: &mut Vec<TelemetryRecord>,
    ) {
        let expired = match &self.session {
            Some(s) => {
                time.elapsed_since(s.last_interaction_at) >= self.inactivity_timeout_nanos
                    || time.elapsed_since(s.started_at) >= self.max_session_duration_nanos
            }
            None => false,
        };

        if expired {
            // The view survives a session renewal, but under a new id and session.
            let carried = self.active_view.as_ref().map(|v| (v.key.clone(), v.name.clone()));
            if carried.is_some() {
                self.stop_active_view(time, records);
            }
            self.actions.clear();
            self.resources.clear();
            self.session = None;
            debug!("Session expired");
            if let Some((key, name)) = carried {
                self.start_session(time);
                self.start_view(&key, &name, time, records);
            }
        }

        if self.session.is_none() && may_create {
            self.start_session(time);
        }
        if is_interaction {
            if let Some(session) = self.session.as_mut() {
                session.last_interaction_at = time;
            }
        }
    }

    fn start_session(&mut self, time: EventTime) {
        let session = SessionScope {
            session_id: Uuid::new_v4(),
            started_at: time,
            last_interaction_at: time,
        };
        debug!("Session {} started", session.session_id);
        self.session = Some(session);
    }

    fn start_view(&mut self, key: &str, name: &str, time: EventTime, records: &mut Vec<TelemetryRecord>) {
        let view = ViewScope {
            view_id: Uuid::new_v4(),
            key: key.to_string(),
            name: name.to_string(),
            started_at: time,
            document_version: 0,
            action_count: 0,
            resource_count: 0,
            error_count: 0,
            crash_count: 0,
            long_task_count: 0,
            frozen_frame_count: 0,
        };
        self.frames.on_view_created(&view.view_id.to_string(), time.nanos);
        self.active_view = Some(view);
        self.update_view(time, records, |_| {});
    }

    /// Emits the final update of the active view with its resolved UI slowness.
    fn stop_active_view(&mut self, time: EventTime, records: &mut Vec<TelemetryRecord>) {
        let Some(mut view) = self.active_view.take() else {
            return;
        };
        let report = self.frames.resolve_report(&view.view_id.to_string());
        let min_lifetime = self.frames.min_view_lifetime_threshold_nanos();
        let lifetime = time.elapsed_since(view.started_at);
        let slow_frames_rate = if lifetime < min_lifetime { 0.0 } else { report.slow_frames_rate() };
        let freeze_rate = report.anr_duration_ratio(time.nanos, min_lifetime);

        view.document_version += 1;
        let mut record = self.view_record(&view, time, false);
        record.slow_frames = report.records.into_iter().collect();
        record.slow_frames_rate = Some(slow_frames_rate);
        record.freeze_rate = Some(freeze_rate);
        records.push(TelemetryRecord::View(record));
    }

    fn update_view(&mut self, time: EventTime, records: &mut Vec<TelemetryRecord>, f: impl FnOnce(&mut ViewScope)) {
        let Some(mut view) = self.active_view.take() else {
            return;
        };
        f(&mut view);
        view.document_version += 1;
        records.push(TelemetryRecord::View(self.view_record(&view, time, true)));
        self.active_view = Some(view);
    }

    fn view_record(&self, view: &ViewScope, time: EventTime, is_active: bool) -> ViewRecord {
        ViewRecord {
            session_id: self.session.as_ref().map(|s| s.session_id).unwrap_or_default(),
            view_id: view.view_id,
            key: view.key.clone(),
            name: view.name.clone(),
            date_ms: view.started_at.wall_ms,
            time_spent_nanos: time.elapsed_since(view.started_at),
            document_version: view.document_version,
            is_active,
            action_count: view.action_count,
            resource_count: view.resource_count,
            error_count: view.error_count,
            crash_count: view.crash_count,
            long_task_count: view.long_task_count,
            frozen_frame_count: view.frozen_frame_count,
            slow_frames: Vec::new(),
            slow_frames_rate: None,
            freeze_rate: None,
        }
    }

    fn ids(&self) -> (Uuid, Option<Uuid>) {
        (
            self.session.as_ref().map(|s| s.session_id).unwrap_or_default(),
            self.active_view.as_ref().map(|v| v.view_id),
        )
    }
}
