use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::event::{ActionType, ErrorSource, TelemetryLevel, ThreadDump};
use crate::kernel::frames::report::SlowFrameRecord;

/// A finished record, ready for the storage writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    View(ViewRecord),
    Action(ActionRecord),
    Resource(ResourceRecord),
    Error(ErrorRecord),
    LongTask(LongTaskRecord),
    Telemetry(TelemetryMessage),
}

impl TelemetryRecord {
    pub fn as_view(&self) -> Option<&ViewRecord> {
        match self {
            TelemetryRecord::View(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorRecord> {
        match self {
            TelemetryRecord::Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub session_id: Uuid,
    pub view_id: Uuid,
    pub key: String,
    pub name: String,
    pub date_ms: i64,
    pub time_spent_nanos: i64,
    /// Bumped on every emitted update of the same view.
    pub document_version: u64,
    pub is_active: bool,
    pub action_count: u64,
    pub resource_count: u64,
    pub error_count: u64,
    pub crash_count: u64,
    pub long_task_count: u64,
    pub frozen_frame_count: u64,
    // Only filled on the final update, once the slow frame report is resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slow_frames: Vec<SlowFrameRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_frames_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub session_id: Uuid,
    pub view_id: Option<Uuid>,
    pub action_type: ActionType,
    pub name: String,
    pub date_ms: i64,
    pub loading_time_nanos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub session_id: Uuid,
    pub view_id: Option<Uuid>,
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub size_bytes: Option<u64>,
    pub date_ms: i64,
    pub duration_nanos: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub session_id: Uuid,
    pub view_id: Option<Uuid>,
    pub message: String,
    pub source: ErrorSource,
    pub stack: Option<String>,
    pub is_fatal: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threads: Vec<ThreadDump>,
    pub date_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTaskRecord {
    pub session_id: Uuid,
    pub view_id: Option<Uuid>,
    pub target: String,
    pub duration_nanos: i64,
    pub is_frozen_frame: bool,
    pub date_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub level: TelemetryLevel,
    pub message: String,
    pub date_ms: i64,
}
