//! Shared fixtures for datanode flush integration tests

#![allow(dead_code)]

use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use proximadb_datanode::core::{CollectionSchema, DataType, FieldSchema, LogPosition, UniqueId};
use proximadb_datanode::datanode::{
    BufferData, FieldData, FlushPackHandler, InMemoryReplica, InsertData, PackCallback, SegmentFlushPack,
};

pub const COLLECTION_ID: UniqueId = 1;
pub const PARTITION_ID: UniqueId = 10;

/// Random 10-byte message ID position
pub fn random_position() -> LogPosition {
    let mut id = vec![0u8; 10];
    rand::thread_rng().fill_bytes(&mut id);
    LogPosition::new(id)
}

pub fn schema() -> CollectionSchema {
    CollectionSchema {
        name: "integration".to_string(),
        fields: vec![
            FieldSchema { field_id: 100, name: "id".to_string(), data_type: DataType::Int64, is_primary_key: true },
            FieldSchema { field_id: 101, name: "embedding".to_string(), data_type: DataType::FloatVector, is_primary_key: false },
        ],
    }
}

pub fn buffer(ids: Vec<i64>) -> BufferData {
    let data: Vec<f32> = ids.iter().flat_map(|id| [*id as f32, 0.5]).collect();
    let mut fields = HashMap::new();
    fields.insert(100, FieldData::Int64(ids));
    fields.insert(101, FieldData::FloatVector { dim: 2, data });
    BufferData::new(InsertData { fields })
}

/// Replica serving `COLLECTION_ID` with the given segments registered in `PARTITION_ID`
pub fn replica_with_segments(segments: &[UniqueId]) -> Arc<InMemoryReplica> {
    let replica = Arc::new(InMemoryReplica::new(COLLECTION_ID));
    replica.set_schema(schema());
    for segment_id in segments {
        replica.add_segment(*segment_id, COLLECTION_ID, PARTITION_ID, Some(LogPosition::new(vec![0])));
    }
    replica
}

/// Handler forwarding every delivered pack into a channel
pub fn collecting_handler() -> (Arc<dyn FlushPackHandler>, mpsc::UnboundedReceiver<SegmentFlushPack>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn FlushPackHandler> = Arc::new(PackCallback::new(move |pack: SegmentFlushPack| {
        let _ = tx.send(pack);
        Ok(())
    }));
    (handler, rx)
}

pub async fn recv_packs(rx: &mut mpsc::UnboundedReceiver<SegmentFlushPack>, count: usize) -> Vec<SegmentFlushPack> {
    let mut packs = Vec::with_capacity(count);
    while packs.len() < count {
        let pack = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for flush packs")
            .expect("pack channel closed");
        packs.push(pack);
    }
    packs
}

/// Nothing else arrives within a short grace period
pub async fn assert_no_more_packs(rx: &mut mpsc::UnboundedReceiver<SegmentFlushPack>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra pack delivered");
}
