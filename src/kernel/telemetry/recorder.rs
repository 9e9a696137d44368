use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

use super::dedup::{filter_out_redundant_view_events, RawBatchEvent, ViewMeta};
use super::event::TelemetryRecord;

const MAX_PENDING_EVENTS: usize = 10_000;

/// Storage collaborator. Implementations persist the record and eventually upload it.
pub trait EventWriter: Send + Sync {
    fn write(&self, record: &TelemetryRecord);
}

/// Writer keeping serialized records in memory until the next flush.
/// Oldest records are evicted once `capacity` is reached.
#[derive(Debug)]
pub struct InMemoryBatchWriter {
    buffer: Mutex<VecDeque<RawBatchEvent>>,
    capacity: usize,
}

impl InMemoryBatchWriter {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_EVENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(MAX_PENDING_EVENTS))),
            capacity: capacity.max(1),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Takes everything written so far, with superseded view updates removed.
    pub fn flush_batch(&self) -> Vec<RawBatchEvent> {
        let batch: Vec<RawBatchEvent> = self.buffer.lock().drain(..).collect();
        filter_out_redundant_view_events(batch)
    }

    /// Deserialized view of the pending records, oldest first.
    pub fn pending_records(&self) -> Vec<TelemetryRecord> {
        self.buffer
            .lock()
            .iter()
            .filter_map(|e| serde_json::from_slice(&e.data).ok())
            .collect()
    }
}

impl Default for InMemoryBatchWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWriter for InMemoryBatchWriter {
    fn write(&self, record: &TelemetryRecord) {
        let data = match serde_json::to_vec(record) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping record that failed to serialize: {}", e);
                return;
            }
        };
        let metadata = match record {
            TelemetryRecord::View(view) => ViewMeta::new(view.view_id.to_string(), view.document_version).encode(),
            _ => Vec::new(),
        };

        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            debug!("Writer buffer full; evicted oldest record");
        }
        buffer.push_back(RawBatchEvent::new(data, metadata));
    }
}
