// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Routes segment flushes to per-segment ordered queues
//!
//! The manager turns insert and delete buffers into [`KvFlushTask`]s (binlog
//! serialization, log ID allocation, path layout) and enqueues them on the
//! segment's [`OrderFlushQueue`], creating the queue on first use. Every queue
//! delivers into the one handler the manager was built with.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::allocator::IdAllocator;
use super::binlog::{binlog_path, BincodeBinlogCodec, BinlogCodec, BufferData};
use super::flush_pack::DelDataBuf;
use super::flush_queue::{FatalFlushEvent, FlushPackHandler, OrderFlushQueue};
use super::flush_task::{EmptyFlushTask, FlushTask, KvFlushTask};
use super::injection::TaskInjection;
use super::replica::SegmentReplica;
use crate::core::{FieldId, FlushConfig, FlushError, FlushResult, LogPosition, SegmentMeta, UniqueId};
use crate::storage::kv::KvStore;

pub struct FlushManager {
    queues: RwLock<HashMap<UniqueId, OrderFlushQueue>>,
    handler: Arc<dyn FlushPackHandler>,
    kv: Arc<dyn KvStore>,
    replica: Arc<dyn SegmentReplica>,
    allocator: Arc<dyn IdAllocator>,
    codec: Arc<dyn BinlogCodec>,
    config: FlushConfig,
    fatal_tx: mpsc::UnboundedSender<FatalFlushEvent>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<FatalFlushEvent>>>,
}

impl FlushManager {
    pub fn new(
        allocator: Arc<dyn IdAllocator>,
        kv: Arc<dyn KvStore>,
        replica: Arc<dyn SegmentReplica>,
        handler: Arc<dyn FlushPackHandler>,
    ) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            queues: RwLock::new(HashMap::new()),
            handler,
            kv,
            replica,
            allocator,
            codec: Arc::new(BincodeBinlogCodec),
            config: FlushConfig::default(),
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        }
    }

    pub fn with_config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn BinlogCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Receiver of queue halts; `None` once taken
    pub fn take_fatal_events(&self) -> Option<mpsc::UnboundedReceiver<FatalFlushEvent>> {
        self.fatal_rx.lock().take()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.read().len()
    }

    /// Drop the segment's queue. Packs already handed to the dispatcher still go out.
    ///
    /// A halted queue is kept so the segment keeps refusing flushes.
    pub fn release_segment(&self, segment_id: UniqueId) -> FlushResult<bool> {
        let mut queues = self.queues.write();
        if queues.get(&segment_id).map_or(false, OrderFlushQueue::is_halted) {
            warn!("⚠️ Segment {} is halted, keeping its flush queue", segment_id);
            return Err(FlushError::SegmentHalted(segment_id));
        }
        let removed = queues.remove(&segment_id).is_some();
        if removed {
            debug!("🗑️ Released flush queue for segment {}", segment_id);
        }
        Ok(removed)
    }

    pub fn queue(&self, segment_id: UniqueId) -> Option<OrderFlushQueue> {
        self.queues.read().get(&segment_id).cloned()
    }

    fn get_or_create_queue(&self, segment_id: UniqueId) -> OrderFlushQueue {
        let existing = self.queues.read().get(&segment_id).cloned();
        if let Some(queue) = existing {
            if queue.location() == (0, 0) {
                if let Ok((collection_id, partition_id)) = self.replica.collection_and_partition_id(segment_id) {
                    queue.relocate(collection_id, partition_id);
                }
            }
            return queue;
        }

        let mut queues = self.queues.write();
        queues
            .entry(segment_id)
            .or_insert_with(|| {
                let (collection_id, partition_id) = self
                    .replica
                    .collection_and_partition_id(segment_id)
                    .unwrap_or_else(|e| {
                        debug!("Segment {} location unresolved, packs carry (0, 0): {}", segment_id, e);
                        (0, 0)
                    });
                info!(
                    "🚀 Flush queue for segment {} (collection {}, partition {})",
                    segment_id, collection_id, partition_id
                );
                OrderFlushQueue::new(
                    segment_id,
                    collection_id,
                    partition_id,
                    self.handler.clone(),
                    self.fatal_tx.clone(),
                )
            })
            .clone()
    }

    /// Resolve collection, partition and schema of a segment at `pos`
    pub fn get_segment_meta(&self, segment_id: UniqueId, pos: &LogPosition) -> FlushResult<SegmentMeta> {
        if !self.replica.has_segment(segment_id) {
            return Err(FlushError::SegmentNotFound(segment_id));
        }

        let (collection_id, partition_id) = self
            .replica
            .collection_and_partition_id(segment_id)
            .map_err(|e| resolution_error(segment_id, e))?;

        let schema = self
            .replica
            .collection_schema(collection_id, pos.timestamp)
            .map_err(|e| resolution_error(segment_id, e))?;

        Ok(SegmentMeta {
            collection_id,
            partition_id,
            schema,
        })
    }

    /// Flush a segment's insert buffer at `pos`.
    ///
    /// Without data only the position is recorded, so the flushed and dropped
    /// flags still reach the handler in order.
    pub async fn flush_buffer_data(
        &self,
        data: Option<BufferData>,
        segment_id: UniqueId,
        flushed: bool,
        dropped: bool,
        pos: LogPosition,
    ) -> FlushResult<()> {
        let data = match data.filter(|d| !d.is_empty()) {
            Some(data) => data,
            None => {
                debug!("Segment {} has no insert data at {}, flushed={}", segment_id, pos, flushed);
                let queue = self.get_or_create_queue(segment_id);
                return queue.enqueue_insert_flush(
                    Arc::new(EmptyFlushTask),
                    HashMap::new(),
                    HashMap::new(),
                    flushed,
                    dropped,
                    pos,
                );
            }
        };

        let meta = self.get_segment_meta(segment_id, &pos)?;
        let (binlogs, statslogs) =
            self.codec
                .serialize_insert(&meta.schema, meta.partition_id, segment_id, &data.buffer)?;

        let mut kvs: HashMap<String, Vec<u8>> = HashMap::with_capacity(binlogs.len() + statslogs.len());
        let mut insert_logs: HashMap<FieldId, String> = HashMap::with_capacity(binlogs.len());
        let mut stats_logs: HashMap<FieldId, String> = HashMap::new();

        let (start, _) = self.allocator.alloc_id_batch(binlogs.len() as u32)?;
        for (offset, blob) in binlogs.into_iter().enumerate() {
            let field_id = blob.field_id()?;
            let log_id = start + offset as UniqueId;
            let key = binlog_path(
                &self.config.insert_binlog_root_path,
                &[meta.collection_id, meta.partition_id, segment_id, field_id, log_id],
            );
            kvs.insert(key.clone(), blob.value);
            insert_logs.insert(field_id, key);
        }

        for blob in statslogs {
            let field_id = blob.field_id()?;
            let log_id = self.allocator.alloc_id()?;
            let key = binlog_path(
                &self.config.stats_binlog_root_path,
                &[meta.collection_id, meta.partition_id, segment_id, field_id, log_id],
            );
            kvs.insert(key.clone(), blob.value);
            stats_logs.insert(field_id, key);
        }

        let checkpoint = serde_json::to_vec(&pos)?;
        debug!(
            "📦 Segment {} insert flush at {}: {} rows, {} binlogs, {} statslogs",
            segment_id,
            pos,
            data.size,
            insert_logs.len(),
            stats_logs.len()
        );

        let task: Arc<dyn FlushTask> = Arc::new(KvFlushTask::for_insert(self.kv.clone(), kvs));
        let queue = self.get_or_create_queue(segment_id);
        queue.relocate(meta.collection_id, meta.partition_id);
        queue.enqueue_insert_flush(task, insert_logs, stats_logs, flushed, dropped, pos.clone())?;

        // the checkpoint only moves once the flush is scheduled
        self.replica.update_segment_checkpoint(segment_id, &pos);
        self.kv.save(&self.config.checkpoint_key(segment_id), checkpoint).await
    }

    /// Flush a segment's delete buffer at `pos`
    pub fn flush_del_data(&self, data: Option<DelDataBuf>, segment_id: UniqueId, pos: LogPosition) -> FlushResult<()> {
        let mut buf = match data.filter(|d| !d.is_empty()) {
            Some(buf) => buf,
            None => {
                return self
                    .get_or_create_queue(segment_id)
                    .enqueue_del_flush(Arc::new(EmptyFlushTask), None, pos);
            }
        };

        let (collection_id, partition_id) = self
            .replica
            .collection_and_partition_id(segment_id)
            .map_err(|e| resolution_error(segment_id, e))?;

        let blob = self
            .codec
            .serialize_delete(collection_id, partition_id, segment_id, &buf.delete_data)?;
        let log_id = self.allocator.alloc_id()?;
        let key = binlog_path(
            &self.config.delete_binlog_root_path,
            &[collection_id, partition_id, segment_id, log_id],
        );
        buf.file_path = key.clone();
        buf.file_size = blob.value.len() as i64;

        debug!(
            "📦 Segment {} delete flush at {}: {} entries -> {}",
            segment_id, pos, buf.size, buf.file_path
        );

        let mut kvs = HashMap::with_capacity(1);
        kvs.insert(key, blob.value);
        let task: Arc<dyn FlushTask> = Arc::new(KvFlushTask::for_delete(self.kv.clone(), kvs));
        let queue = self.get_or_create_queue(segment_id);
        queue.relocate(collection_id, partition_id);
        queue.enqueue_del_flush(task, Some(buf), pos)
    }

    pub fn inject_flush(&self, injection: TaskInjection, segment_id: UniqueId) -> FlushResult<()> {
        self.get_or_create_queue(segment_id).inject_flush(injection)
    }
}

fn resolution_error(segment_id: UniqueId, err: FlushError) -> FlushError {
    match err {
        FlushError::SegmentNotFound(_) => FlushError::SegmentNotFound(segment_id),
        FlushError::MetadataResolution { reason, .. } => FlushError::MetadataResolution { segment_id, reason },
        other => FlushError::MetadataResolution {
            segment_id,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CollectionSchema, DataType, FieldSchema};
    use crate::datanode::allocator::LocalIdAllocator;
    use crate::datanode::binlog::{FieldData, InsertData};
    use crate::datanode::flush_pack::SegmentFlushPack;
    use crate::datanode::flush_queue::PackCallback;
    use crate::datanode::replica::{InMemoryReplica, SegmentState};
    use crate::storage::kv::MemoryKv;
    use std::time::Duration;
    use tokio::time::timeout;

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "docs".to_string(),
            fields: vec![
                FieldSchema { field_id: 100, name: "id".to_string(), data_type: DataType::Int64, is_primary_key: true },
                FieldSchema { field_id: 101, name: "score".to_string(), data_type: DataType::Float, is_primary_key: false },
            ],
        }
    }

    fn buffer() -> BufferData {
        let mut fields = HashMap::new();
        fields.insert(100, FieldData::Int64(vec![3, 1, 2]));
        fields.insert(101, FieldData::Float(vec![0.5, 0.25, 1.0]));
        BufferData::new(InsertData { fields })
    }

    struct Harness {
        manager: FlushManager,
        kv: MemoryKv,
        replica: Arc<InMemoryReplica>,
        packs: mpsc::UnboundedReceiver<SegmentFlushPack>,
    }

    fn harness() -> Harness {
        let kv = MemoryKv::new();
        let replica = Arc::new(InMemoryReplica::new(1));
        replica.set_schema(schema());
        replica.add_segment(1, 1, 10, Some(LogPosition::new(vec![0])));

        let (tx, packs) = mpsc::unbounded_channel();
        let handler = Arc::new(PackCallback::new(move |pack: SegmentFlushPack| {
            let _ = tx.send(pack);
            Ok(())
        }));
        let manager = FlushManager::new(
            Arc::new(LocalIdAllocator::new(1000)),
            Arc::new(kv.clone()),
            replica.clone(),
            handler,
        );
        Harness { manager, kv, replica, packs }
    }

    async fn next_pack(rx: &mut mpsc::UnboundedReceiver<SegmentFlushPack>) -> SegmentFlushPack {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_buffer_data_writes_binlogs_and_checkpoint() {
        let mut h = harness();
        let pos = LogPosition::new(vec![1]).with_timestamp(42);

        h.manager.flush_buffer_data(Some(buffer()), 1, false, false, pos.clone()).await.unwrap();
        h.manager.flush_del_data(None, 1, pos.clone()).unwrap();

        let pack = next_pack(&mut h.packs).await;
        assert!(pack.err.is_none());
        assert_eq!((pack.collection_id, pack.partition_id), (1, 10));
        assert_eq!(pack.insert_logs.len(), 2);
        assert_eq!(pack.insert_logs[&100], "files/insert_log/1/10/1/100/1000");
        assert_eq!(pack.insert_logs[&101], "files/insert_log/1/10/1/101/1001");
        assert_eq!(pack.stats_logs[&100], "files/stats_log/1/10/1/100/1002");

        let mut keys = h.kv.keys_with_prefix("files/").await;
        keys.sort();
        assert_eq!(keys.len(), 3);

        let checkpoint = h.kv.load("datanode/segment_checkpoint/1").await.unwrap().unwrap();
        let saved: LogPosition = serde_json::from_slice(&checkpoint).unwrap();
        assert_eq!(saved, pos);
        assert_eq!(h.replica.segment(1).unwrap().state, SegmentState::Normal);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_del_data_sets_delta_path() {
        let mut h = harness();
        let pos = LogPosition::new(vec![2]);
        let buf: DelDataBuf = vec![(1, 100), (2, 90)].into_iter().collect();

        h.manager.flush_buffer_data(None, 1, false, false, pos.clone()).await.unwrap();
        h.manager.flush_del_data(Some(buf), 1, pos).unwrap();

        let pack = next_pack(&mut h.packs).await;
        assert!(pack.insert_logs.is_empty());
        assert_eq!(pack.delta_logs.len(), 1);
        let delta = &pack.delta_logs[0];
        assert_eq!(delta.file_path, "files/delta_log/1/10/1/1000");
        assert!(delta.file_size > 0);
        assert_eq!((delta.ts_from, delta.ts_to), (90, 100));
        assert!(h.kv.load(&delta.file_path).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_flush_carries_flags() {
        let mut h = harness();
        let pos = LogPosition::new(vec![3]);

        h.manager.flush_del_data(Some(DelDataBuf::new()), 1, pos.clone()).unwrap();
        h.manager.flush_buffer_data(None, 1, true, false, pos).await.unwrap();

        let pack = next_pack(&mut h.packs).await;
        assert!(pack.flushed);
        assert!(!pack.dropped);
        assert!(pack.insert_logs.is_empty() && pack.delta_logs.is_empty());
        assert!(h.kv.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_segment_meta_errors() {
        let h = harness();
        let pos = LogPosition::new(vec![9]);

        assert_eq!(h.manager.get_segment_meta(404, &pos), Err(FlushError::SegmentNotFound(404)));

        h.replica.add_segment(2, 77, 10, None);
        assert!(matches!(
            h.manager.get_segment_meta(2, &pos),
            Err(FlushError::MetadataResolution { segment_id: 2, .. })
        ));

        let meta = h.manager.get_segment_meta(1, &pos).unwrap();
        assert_eq!((meta.collection_id, meta.partition_id), (1, 10));
        assert_eq!(meta.schema.name, "docs");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_schema_blocks_insert_flush() {
        let replica = Arc::new(InMemoryReplica::new(1));
        replica.add_segment(1, 1, 10, None);
        let handler = Arc::new(PackCallback::new(|_pack: SegmentFlushPack| Ok(())));
        let manager = FlushManager::new(
            Arc::new(LocalIdAllocator::default()),
            Arc::new(MemoryKv::new()),
            replica,
            handler,
        );

        let err = manager
            .flush_buffer_data(Some(buffer()), 1, false, false, LogPosition::new(vec![1]))
            .await
            .unwrap_err();
        assert!(matches!(err, FlushError::MetadataResolution { segment_id: 1, .. }));
        assert_eq!(manager.queue_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queues_created_once_under_concurrency() {
        let h = harness();
        let manager = Arc::new(h.manager);

        let mut handles = Vec::new();
        for segment_id in 0..8 {
            for _ in 0..4 {
                let manager = manager.clone();
                handles.push(tokio::spawn(async move { manager.get_or_create_queue(segment_id).segment_id() }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(manager.queue_count(), 8);
        assert_eq!(manager.release_segment(3), Ok(true));
        assert_eq!(manager.release_segment(3), Ok(false));
        assert!(manager.take_fatal_events().is_some());
        assert!(manager.take_fatal_events().is_none());
    }

    fn failing_manager(replica: Arc<InMemoryReplica>, kv: MemoryKv) -> FlushManager {
        let handler = Arc::new(PackCallback::new(|pack: SegmentFlushPack| {
            Err(FlushError::fatal(pack.segment_id, "save failed"))
        }));
        FlushManager::new(Arc::new(LocalIdAllocator::default()), Arc::new(kv), replica, handler)
    }

    async fn halt_segment(manager: &FlushManager, segment_id: UniqueId) {
        let mut fatal = manager.take_fatal_events().unwrap();
        let pos = LogPosition::new(vec![0xff]);
        manager.flush_buffer_data(None, segment_id, false, false, pos.clone()).await.unwrap();
        manager.flush_del_data(None, segment_id, pos).unwrap();
        let event = timeout(Duration::from_secs(5), fatal.recv()).await.unwrap().unwrap();
        assert_eq!(event.segment_id, segment_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_flush_leaves_checkpoint_untouched() {
        let kv = MemoryKv::new();
        let replica = Arc::new(InMemoryReplica::new(1));
        replica.set_schema(schema());
        replica.add_segment(1, 1, 10, None);
        let manager = failing_manager(replica.clone(), kv.clone());
        halt_segment(&manager, 1).await;

        let err = manager
            .flush_buffer_data(Some(buffer()), 1, false, false, LogPosition::new(vec![1]))
            .await
            .unwrap_err();
        assert_eq!(err, FlushError::SegmentHalted(1));
        assert_eq!(kv.load("datanode/segment_checkpoint/1").await.unwrap(), None);
        assert_eq!(replica.segment(1).unwrap().checkpoint, None);
        assert_eq!(replica.segment(1).unwrap().state, SegmentState::New);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_insert_keeps_first_checkpoint() {
        let mut h = harness();
        let first = LogPosition::new(vec![1]).with_timestamp(1);
        h.manager.flush_buffer_data(Some(buffer()), 1, false, false, first.clone()).await.unwrap();

        let mut again = first.clone();
        again.timestamp = 2;
        let err = h.manager.flush_buffer_data(Some(buffer()), 1, false, false, again).await.unwrap_err();
        assert!(matches!(err, FlushError::InvalidInput(_)));

        let saved = h.kv.load("datanode/segment_checkpoint/1").await.unwrap().unwrap();
        let saved: LogPosition = serde_json::from_slice(&saved).unwrap();
        assert_eq!(saved.timestamp, 1);

        h.manager.flush_del_data(None, 1, first).unwrap();
        assert!(next_pack(&mut h.packs).await.err.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_injection_before_registration_still_locates_packs() {
        let mut h = harness();
        let (injection, handle) = TaskInjection::identity();
        h.manager.inject_flush(injection, 5).unwrap();
        handle.resolve().await.unwrap();
        assert_eq!(h.manager.queue(5).unwrap().location(), (0, 0));

        h.replica.add_segment(5, 1, 10, None);
        let pos = LogPosition::new(vec![1]);
        h.manager.flush_buffer_data(Some(buffer()), 5, false, false, pos.clone()).await.unwrap();
        h.manager.flush_del_data(None, 5, pos).unwrap();

        let pack = next_pack(&mut h.packs).await;
        assert_eq!((pack.collection_id, pack.partition_id), (1, 10));
        assert!(pack.insert_logs[&100].starts_with("files/insert_log/1/10/5/"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_flush_after_registration_relocates_queue() {
        let mut h = harness();
        let pos = LogPosition::new(vec![1]);
        h.manager.flush_buffer_data(None, 6, false, false, pos.clone()).await.unwrap();
        h.replica.add_segment(6, 1, 11, None);
        h.manager.flush_del_data(None, 6, pos).unwrap();

        let pack = next_pack(&mut h.packs).await;
        assert_eq!((pack.collection_id, pack.partition_id), (1, 11));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_halted_segment_cannot_be_released() {
        let replica = Arc::new(InMemoryReplica::new(1));
        replica.add_segment(2, 1, 10, None);
        let manager = failing_manager(replica, MemoryKv::new());
        halt_segment(&manager, 2).await;

        assert_eq!(manager.release_segment(2), Err(FlushError::SegmentHalted(2)));
        assert_eq!(manager.queue_count(), 1);
        let err = manager.flush_del_data(None, 2, LogPosition::new(vec![3])).unwrap_err();
        assert_eq!(err, FlushError::SegmentHalted(2));
    }
}
