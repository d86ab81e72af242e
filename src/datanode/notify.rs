// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Reports delivered flush packs to the data coordinator
//!
//! A pack that carries an error, or whose paths cannot be saved after the
//! configured retries, is fatal: its binlogs may already be durable and
//! nothing else will ever reference them. The notifier returns
//! [`FlushError::Fatal`] so the segment's queue halts and the supervisor is told.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::cache::FlushingSegmentCache;
use super::coordinator::{CheckPoint, DataCoordinator, DeltaLogInfo, FieldBinlog, SaveBinlogPathsRequest};
use super::flush_pack::SegmentFlushPack;
use super::flush_queue::FlushPackHandler;
use super::replica::SegmentReplica;
use crate::core::{FlushError, FlushResult, RetryConfig, UniqueId};
use crate::utils::retry_with_backoff;

/// Packer handler that persists pack paths through SaveBinlogPaths
pub struct FlushNotifier {
    node_id: String,
    collection_id: UniqueId,
    replica: Arc<dyn SegmentReplica>,
    coordinator: Arc<dyn DataCoordinator>,
    flushing_segments: FlushingSegmentCache,
    retry: RetryConfig,
}

impl FlushNotifier {
    pub fn new(
        collection_id: UniqueId,
        replica: Arc<dyn SegmentReplica>,
        coordinator: Arc<dyn DataCoordinator>,
        flushing_segments: FlushingSegmentCache,
        retry: RetryConfig,
    ) -> Self {
        Self {
            node_id: String::new(),
            collection_id,
            replica,
            coordinator,
            flushing_segments,
            retry,
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    fn build_request(&self, pack: &SegmentFlushPack) -> SaveBinlogPathsRequest {
        let mut field2_binlog_paths: Vec<FieldBinlog> = pack
            .insert_logs
            .iter()
            .map(|(field_id, path)| FieldBinlog {
                field_id: *field_id,
                binlogs: vec![path.clone()],
            })
            .collect();
        field2_binlog_paths.sort_by_key(|f| f.field_id);

        let mut field2_statslog_paths: Vec<FieldBinlog> = pack
            .stats_logs
            .iter()
            .map(|(field_id, path)| FieldBinlog {
                field_id: *field_id,
                binlogs: vec![path.clone()],
            })
            .collect();
        field2_statslog_paths.sort_by_key(|f| f.field_id);

        let deltalogs = pack
            .delta_logs
            .iter()
            .map(|buf| DeltaLogInfo {
                record_entries: buf.size.max(0) as u64,
                timestamp_from: buf.ts_from,
                timestamp_to: buf.ts_to,
                delta_log_path: buf.file_path.clone(),
                delta_log_size: buf.file_size,
            })
            .collect();

        // only the current segment's checkpoint
        let num_of_rows = self
            .replica
            .segment_statistics_updates(pack.segment_id)
            .map(|updates| updates.num_rows)
            .unwrap_or_default();
        let checkpoints = vec![CheckPoint {
            segment_id: pack.segment_id,
            num_of_rows,
            position: pack.pos.clone(),
        }];

        SaveBinlogPathsRequest {
            source_id: self.node_id.clone(),
            segment_id: pack.segment_id,
            collection_id: self.collection_id,
            field2_binlog_paths,
            field2_statslog_paths,
            deltalogs,
            checkpoints,
            start_positions: self.replica.list_new_segments_start_positions(),
            flushed: pack.flushed,
            dropped: pack.dropped,
        }
    }

    /// Report one pack; every `Err` returned here is fatal
    pub async fn notify(&self, pack: SegmentFlushPack) -> FlushResult<()> {
        let segment_id = pack.segment_id;
        if let Some(err) = &pack.err {
            error!("🛑 Flush pack for segment {} carries an error, datanode must stop: {}", segment_id, err);
            return Err(FlushError::fatal(segment_id, format!("flush pack with error: {}", err)));
        }

        let req = self.build_request(&pack);
        debug!(
            "📨 SaveBinlogPaths segment={} collection={} binlogs={} statslogs={} deltalogs={} flushed={} dropped={} pos={}",
            segment_id,
            self.collection_id,
            req.field2_binlog_paths.len(),
            req.field2_statslog_paths.len(),
            req.deltalogs.len(),
            req.flushed,
            req.dropped,
            pack.pos
        );

        let coordinator = &self.coordinator;
        let result = retry_with_backoff(&self.retry, "SaveBinlogPaths", || {
            let req = req.clone();
            async move {
                let status = coordinator.save_binlog_paths(req).await.map_err(|e| FlushError::DownstreamSave {
                    segment_id,
                    reason: e.to_string(),
                })?;
                if !status.is_success() {
                    return Err(FlushError::DownstreamSave {
                        segment_id,
                        reason: format!("data service save bin log path failed, reason = {}", status.reason),
                    });
                }
                Ok(())
            }
        })
        .await;

        if let Err(err) = result {
            error!("🛑 Failed to save binlog paths for segment {}: {}", segment_id, err);
            return Err(FlushError::fatal(segment_id, err.to_string()));
        }

        if pack.flushed || pack.dropped {
            self.replica.segment_flushed(segment_id);
        }
        self.flushing_segments.remove(segment_id);

        info!(
            "✅ Saved binlog paths for segment {} at {} (flushed={}, dropped={})",
            segment_id, pack.pos, pack.flushed, pack.dropped
        );
        Ok(())
    }
}

#[async_trait]
impl FlushPackHandler for FlushNotifier {
    async fn handle(&self, pack: SegmentFlushPack) -> FlushResult<()> {
        self.notify(pack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogPosition;
    use crate::datanode::coordinator::InMemoryDataCoordinator;
    use crate::datanode::flush_pack::DelDataBuf;
    use crate::datanode::replica::{InMemoryReplica, SegmentState};
    use std::collections::HashMap;

    struct Fixture {
        replica: Arc<InMemoryReplica>,
        coordinator: Arc<InMemoryDataCoordinator>,
        cache: FlushingSegmentCache,
        notifier: FlushNotifier,
    }

    fn fixture() -> Fixture {
        let replica = Arc::new(InMemoryReplica::new(1));
        replica.add_segment(1, 1, 10, Some(LogPosition::new(vec![0])));
        replica.add_rows(1, 3).unwrap();
        let coordinator = Arc::new(InMemoryDataCoordinator::new());
        let cache = FlushingSegmentCache::new();
        let notifier = FlushNotifier::new(1, replica.clone(), coordinator.clone(), cache.clone(), RetryConfig::attempts(1))
            .with_node_id("datanode-test");
        Fixture { replica, coordinator, cache, notifier }
    }

    fn sealed_pack() -> SegmentFlushPack {
        let mut insert_logs = HashMap::new();
        insert_logs.insert(1, "/dev/test/id".to_string());
        let mut stats_logs = HashMap::new();
        stats_logs.insert(1, "/dev/test/id-stats".to_string());
        let mut del = DelDataBuf::new();
        del.push(7, 100);
        del.file_path = "/dev/test/del".to_string();
        del.file_size = 24;

        SegmentFlushPack::new(1, LogPosition::new(vec![5]))
            .with_insert_logs(insert_logs, stats_logs)
            .with_delta_log(del)
            .with_flags(true, false)
    }

    #[tokio::test]
    async fn test_normal_run_saves_paths() {
        let f = fixture();
        f.cache.check_or_cache(1);

        f.notifier.notify(sealed_pack()).await.unwrap();

        let saved = f.coordinator.saved_requests();
        assert_eq!(saved.len(), 1);
        let req = &saved[0];
        assert_eq!(req.source_id, "datanode-test");
        assert_eq!(req.field2_binlog_paths[0].binlogs, vec!["/dev/test/id".to_string()]);
        assert_eq!(req.field2_statslog_paths[0].binlogs, vec!["/dev/test/id-stats".to_string()]);
        assert_eq!(req.deltalogs[0].delta_log_path, "/dev/test/del");
        assert_eq!(req.deltalogs[0].record_entries, 1);
        assert_eq!(req.checkpoints[0].num_of_rows, 3);
        assert_eq!(req.start_positions.len(), 1);
        assert!(req.flushed);

        assert_eq!(f.replica.segment(1).unwrap().state, SegmentState::Flushed);
        assert!(!f.cache.contains(1));
    }

    #[tokio::test]
    async fn test_pack_with_error_is_fatal_without_rpc() {
        let f = fixture();
        let pack = SegmentFlushPack::new(1, LogPosition::new(vec![1]))
            .with_error(FlushError::Storage("mocked pack error".to_string()));

        let err = f.notifier.notify(pack).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(f.coordinator.calls(), 0);
    }

    #[tokio::test]
    async fn test_not_success_status_is_fatal() {
        let f = fixture();
        f.coordinator.set_save_not_success(true);

        let err = f.notifier.notify(SegmentFlushPack::new(1, LogPosition::new(vec![1]))).await.unwrap_err();
        assert!(matches!(err, FlushError::Fatal { segment_id: 1, .. }));
        assert_eq!(f.replica.segment(1).unwrap().state, SegmentState::New);
    }

    #[tokio::test]
    async fn test_call_error_is_fatal_after_all_attempts() {
        let mut f = fixture();
        f.notifier.retry = RetryConfig::attempts(3);
        f.coordinator.set_save_error(true);

        let err = f.notifier.notify(SegmentFlushPack::new(1, LogPosition::new(vec![1]))).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(f.coordinator.calls(), 3);
    }
}
