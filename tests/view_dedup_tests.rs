use vigil::kernel::event::ErrorSource;
use vigil::kernel::telemetry::dedup::{filter_out_redundant_view_events, RawBatchEvent, ViewEventDeduplicator, ViewMeta};
use vigil::kernel::telemetry::event::{ErrorRecord, TelemetryRecord};
use vigil::kernel::telemetry::recorder::{EventWriter, InMemoryBatchWriter};

fn view_event(tag: &str, view_id: &str, version: u64) -> RawBatchEvent {
    RawBatchEvent::new(tag.as_bytes().to_vec(), ViewMeta::new(view_id, version).encode())
}

fn plain_event(tag: &str, metadata: &[u8]) -> RawBatchEvent {
    RawBatchEvent::new(tag.as_bytes().to_vec(), metadata.to_vec())
}

fn tags(batch: &[RawBatchEvent]) -> Vec<String> {
    batch.iter().map(|e| String::from_utf8_lossy(&e.data).into_owned()).collect()
}

#[test]
fn test_only_highest_document_version_survives() {
    let batch = vec![view_event("v1", "V", 1), view_event("v3", "V", 3), view_event("v2", "V", 2)];

    let filtered = ViewEventDeduplicator.filter_out_redundant_view_events(batch);
    assert_eq!(tags(&filtered), vec!["v3"]);
}

#[test]
fn test_non_view_records_always_kept_in_order() {
    let batch = vec![
        plain_event("error", b""),
        view_event("a1", "A", 1),
        plain_event("garbage", b"{not json"),
        view_event("b2", "B", 2),
        plain_event("action", br#"{"type":"action","id":"x"}"#),
        view_event("a2", "A", 2),
        view_event("b1", "B", 1),
        plain_event("resource", b""),
    ];

    let filtered = filter_out_redundant_view_events(batch);
    assert_eq!(tags(&filtered), vec!["error", "garbage", "b2", "action", "a2", "resource"]);
}

#[test]
fn test_duplicate_max_versions_are_all_kept() {
    let batch = vec![view_event("first", "V", 4), view_event("older", "V", 2), view_event("second", "V", 4)];

    let filtered = filter_out_redundant_view_events(batch);
    assert_eq!(tags(&filtered), vec!["first", "second"]);
}

#[test]
fn test_empty_batch() {
    assert!(filter_out_redundant_view_events(Vec::new()).is_empty());
}

#[test]
fn test_view_meta_wire_shape() {
    let encoded = ViewMeta::new("abc", 7).encode();
    let json: serde_json::Value = serde_json::from_slice(&encoded).expect("valid json");
    assert_eq!(json["type"], "view");
    assert_eq!(json["viewId"], "abc");
    assert_eq!(json["documentVersion"], 7);

    assert_eq!(ViewMeta::decode(&encoded), Some(ViewMeta::new("abc", 7)));
    assert_eq!(ViewMeta::decode(b"\x00\x01"), None);
}

#[test]
fn test_batch_writer_flushes_deduplicated_batch() {
    let writer = InMemoryBatchWriter::new();
    let session_id = uuid::Uuid::new_v4();
    let view_id = uuid::Uuid::new_v4();

    let mut view = vigil::kernel::telemetry::event::ViewRecord {
        session_id,
        view_id,
        key: "home".into(),
        name: "Home".into(),
        date_ms: 0,
        time_spent_nanos: 0,
        document_version: 1,
        is_active: true,
        action_count: 0,
        resource_count: 0,
        error_count: 0,
        crash_count: 0,
        long_task_count: 0,
        frozen_frame_count: 0,
        slow_frames: Vec::new(),
        slow_frames_rate: None,
        freeze_rate: None,
    };
    writer.write(&TelemetryRecord::View(view.clone()));
    writer.write(&TelemetryRecord::Error(ErrorRecord {
        session_id,
        view_id: Some(view_id),
        message: "boom".into(),
        source: ErrorSource::Source,
        stack: None,
        is_fatal: false,
        threads: Vec::new(),
        date_ms: 0,
    }));
    view.document_version = 2;
    view.error_count = 1;
    writer.write(&TelemetryRecord::View(view.clone()));

    assert_eq!(writer.pending_len(), 3);
    let batch = writer.flush_batch();
    assert_eq!(batch.len(), 2, "Version 1 of the view is superseded");
    assert_eq!(writer.pending_len(), 0);

    let records: Vec<TelemetryRecord> = batch
        .iter()
        .map(|e| serde_json::from_slice(&e.data).expect("record round-trips"))
        .collect();
    assert!(records[0].as_error().is_some());
    assert_eq!(records[1].as_view().map(|v| v.document_version), Some(2));
}

#[test]
fn test_batch_writer_evicts_oldest_when_full() {
    let writer = InMemoryBatchWriter::with_capacity(2);
    for i in 0..3 {
        writer.write(&TelemetryRecord::Telemetry(vigil::kernel::telemetry::event::TelemetryMessage {
            level: vigil::kernel::event::TelemetryLevel::Debug,
            message: format!("m{}", i),
            date_ms: 0,
        }));
    }
    let messages: Vec<String> = writer
        .pending_records()
        .into_iter()
        .filter_map(|r| match r {
            TelemetryRecord::Telemetry(m) => Some(m.message),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec!["m1", "m2"]);
}
