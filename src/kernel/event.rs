use serde::{Deserialize, Serialize};
use super::time::EventTime;

/// One rendered frame as reported by the platform frame scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSample {
    pub start_nanos: i64,
    pub duration_nanos: i64,
    pub is_jank: bool,
}

impl FrameSample {
    pub fn new(start_nanos: i64, duration_nanos: i64, is_jank: bool) -> Self {
        Self { start_nanos, duration_nanos, is_jank }
    }

    pub fn end_nanos(&self) -> i64 {
        self.start_nanos.saturating_add(self.duration_nanos)
    }
}

/// State of one live thread at the moment a hang (or crash) was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDump {
    pub name: String,
    pub state: String,
    pub stack: String,
    pub crashed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Source,
    Network,
    Logger,
    Anr,
    Crash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Tap,
    Scroll,
    Swipe,
    Click,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryLevel {
    Debug,
    Error,
}

/// Inbound signal. Immutable once built; `time` is taken at the call site,
/// never when the dispatcher gets around to applying it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub time: EventTime,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEventKind {
    StartView { key: String, name: String },
    StopView { key: String },
    StartAction { action_type: ActionType, name: String },
    StopAction { action_type: ActionType, name: String },
    StartResource { key: String, method: String, url: String },
    StopResource { key: String, status_code: Option<u16>, size_bytes: Option<u64> },
    AddError {
        message: String,
        source: ErrorSource,
        stack: Option<String>,
        is_fatal: bool,
        threads: Vec<ThreadDump>,
    },
    AddFrameSample(FrameSample),
    AddLongTask { duration_nanos: i64, target: String },
    SendTelemetry { level: TelemetryLevel, message: String },
    KeepAlive,
}

impl RawEvent {
    pub fn new(time: EventTime, kind: RawEventKind) -> Self {
        Self { time, kind }
    }

    /// Fatal events bypass the queue: the process may be gone right after.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, RawEventKind::AddError { is_fatal: true, .. })
    }

    /// Stable name of the event kind, used as the call-rate key.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            RawEventKind::StartView { .. } => "start_view",
            RawEventKind::StopView { .. } => "stop_view",
            RawEventKind::StartAction { .. } => "start_action",
            RawEventKind::StopAction { .. } => "stop_action",
            RawEventKind::StartResource { .. } => "start_resource",
            RawEventKind::StopResource { .. } => "stop_resource",
            RawEventKind::AddError { .. } => "add_error",
            RawEventKind::AddFrameSample(_) => "add_frame_sample",
            RawEventKind::AddLongTask { .. } => "add_long_task",
            RawEventKind::SendTelemetry { .. } => "send_telemetry",
            RawEventKind::KeepAlive => "keep_alive",
        }
    }

    // Convenience constructors for the public monitor API.

    pub fn start_view(time: EventTime, key: &str, name: &str) -> Self {
        Self::new(time, RawEventKind::StartView { key: key.to_string(), name: name.to_string() })
    }

    pub fn stop_view(time: EventTime, key: &str) -> Self {
        Self::new(time, RawEventKind::StopView { key: key.to_string() })
    }

    pub fn error(time: EventTime, message: &str, source: ErrorSource) -> Self {
        Self::new(
            time,
            RawEventKind::AddError {
                message: message.to_string(),
                source,
                stack: None,
                is_fatal: false,
                threads: Vec::new(),
            },
        )
    }

    pub fn crash(time: EventTime, message: &str, stack: &str, threads: Vec<ThreadDump>) -> Self {
        Self::new(
            time,
            RawEventKind::AddError {
                message: message.to_string(),
                source: ErrorSource::Crash,
                stack: Some(stack.to_string()),
                is_fatal: true,
                threads,
            },
        )
    }

    pub fn frame(time: EventTime, sample: FrameSample) -> Self {
        Self::new(time, RawEventKind::AddFrameSample(sample))
    }

    pub fn long_task(time: EventTime, duration_nanos: i64, target: &str) -> Self {
        Self::new(time, RawEventKind::AddLongTask { duration_nanos, target: target.to_string() })
    }

    pub fn keep_alive(time: EventTime) -> Self {
        Self::new(time, RawEventKind::KeepAlive)
    }
}
