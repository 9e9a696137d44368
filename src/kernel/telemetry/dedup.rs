use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A serialized record plus its metadata blob, as the storage layer holds it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawBatchEvent {
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl RawBatchEvent {
    pub fn new(data: Vec<u8>, metadata: Vec<u8>) -> Self {
        Self { data, metadata }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewMeta {
    pub view_id: String,
    pub document_version: u64,
}

/// Metadata envelope. Only view metadata is understood; anything else is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventMeta {
    View(ViewMeta),
}

impl ViewMeta {
    pub fn new(view_id: impl Into<String>, document_version: u64) -> Self {
        Self { view_id: view_id.into(), document_version }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a two-field struct into a Vec cannot fail.
        serde_json::to_vec(&EventMeta::View(self.clone())).unwrap_or_default()
    }

    /// `None` for empty, non-view or malformed metadata.
    pub fn decode(metadata: &[u8]) -> Option<ViewMeta> {
        if metadata.is_empty() {
            return None;
        }
        match serde_json::from_slice::<EventMeta>(metadata) {
            Ok(EventMeta::View(meta)) => Some(meta),
            Err(e) => {
                debug!("Batch metadata is not view metadata ({}); keeping record as-is", e);
                None
            }
        }
    }
}

/// Collapses superseded view updates before upload, the same way the intake
/// reducer does: per view id only the highest document version survives.
pub struct ViewEventDeduplicator;

impl ViewEventDeduplicator {
    pub fn filter_out_redundant_view_events(&self, batch: Vec<RawBatchEvent>) -> Vec<RawBatchEvent> {
        filter_out_redundant_view_events(batch)
    }
}

pub fn filter_out_redundant_view_events(batch: Vec<RawBatchEvent>) -> Vec<RawBatchEvent> {
    let metas: Vec<Option<ViewMeta>> = batch.iter().map(|e| ViewMeta::decode(&e.metadata)).collect();

    // 1. Max version per view id across the whole batch
    let mut max_versions: HashMap<&str, u64> = HashMap::new();
    for meta in metas.iter().flatten() {
        max_versions
            .entry(meta.view_id.as_str())
            .and_modify(|v| *v = (*v).max(meta.document_version))
            .or_insert(meta.document_version);
    }

    // 2. Keep survivors in original order. Non-view records always survive.
    let before = batch.len();
    let kept: Vec<RawBatchEvent> = batch
        .into_iter()
        .zip(metas.iter())
        .filter(|(_, meta)| match meta {
            Some(meta) => max_versions.get(meta.view_id.as_str()) == Some(&meta.document_version),
            None => true,
        })
        .map(|(event, _)| event)
        .collect();

    if kept.len() != before {
        debug!("Dropped {} redundant view events from batch of {}", before - kept.len(), before);
    }
    kept
}
