// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Segment replica boundary: which segments live on this node and where they belong

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::coordinator::SegmentStartPosition;
use crate::core::{CollectionSchema, FlushError, FlushResult, LogPosition, Timestamp, UniqueId};

/// Row count change reported alongside a checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatisticsUpdates {
    pub segment_id: UniqueId,
    pub num_rows: i64,
}

/// Segment bookkeeping consulted by the flush path
pub trait SegmentReplica: Send + Sync {
    fn has_segment(&self, segment_id: UniqueId) -> bool;

    fn collection_and_partition_id(&self, segment_id: UniqueId) -> FlushResult<(UniqueId, UniqueId)>;

    fn collection_schema(&self, collection_id: UniqueId, ts: Timestamp) -> FlushResult<CollectionSchema>;

    /// Record that everything up to `pos` has been handed to a flush
    fn update_segment_checkpoint(&self, segment_id: UniqueId, pos: &LogPosition);

    fn segment_statistics_updates(&self, segment_id: UniqueId) -> FlushResult<SegmentStatisticsUpdates>;

    /// Start positions of segments not yet reported to the coordinator
    fn list_new_segments_start_positions(&self) -> Vec<SegmentStartPosition>;

    fn segment_flushed(&self, segment_id: UniqueId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    New,
    Normal,
    Flushed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: UniqueId,
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub num_rows: i64,
    pub state: SegmentState,
    pub start_position: Option<LogPosition>,
    pub checkpoint: Option<LogPosition>,
}

/// Replica for a single collection held in memory
#[derive(Debug)]
pub struct InMemoryReplica {
    collection_id: UniqueId,
    schema: RwLock<Option<CollectionSchema>>,
    segments: RwLock<HashMap<UniqueId, Segment>>,
}

impl InMemoryReplica {
    pub fn new(collection_id: UniqueId) -> Self {
        Self {
            collection_id,
            schema: RwLock::new(None),
            segments: RwLock::new(HashMap::new()),
        }
    }

    pub fn collection_id(&self) -> UniqueId {
        self.collection_id
    }

    pub fn set_schema(&self, schema: CollectionSchema) {
        *self.schema.write() = Some(schema);
    }

    pub fn add_segment(
        &self,
        segment_id: UniqueId,
        collection_id: UniqueId,
        partition_id: UniqueId,
        start_position: Option<LogPosition>,
    ) {
        let segment = Segment {
            segment_id,
            collection_id,
            partition_id,
            num_rows: 0,
            state: SegmentState::New,
            start_position,
            checkpoint: None,
        };
        self.segments.write().insert(segment_id, segment);
        debug!("➕ Replica registered segment {} (collection {}, partition {})", segment_id, collection_id, partition_id);
    }

    pub fn add_rows(&self, segment_id: UniqueId, rows: i64) -> FlushResult<()> {
        let mut segments = self.segments.write();
        let segment = segments.get_mut(&segment_id).ok_or(FlushError::SegmentNotFound(segment_id))?;
        segment.num_rows += rows;
        Ok(())
    }

    pub fn remove_segment(&self, segment_id: UniqueId) -> Option<Segment> {
        self.segments.write().remove(&segment_id)
    }

    pub fn segment(&self, segment_id: UniqueId) -> Option<Segment> {
        self.segments.read().get(&segment_id).cloned()
    }
}

impl SegmentReplica for InMemoryReplica {
    fn has_segment(&self, segment_id: UniqueId) -> bool {
        self.segments.read().contains_key(&segment_id)
    }

    fn collection_and_partition_id(&self, segment_id: UniqueId) -> FlushResult<(UniqueId, UniqueId)> {
        let segments = self.segments.read();
        let segment = segments.get(&segment_id).ok_or(FlushError::SegmentNotFound(segment_id))?;
        if segment.collection_id != self.collection_id {
            return Err(FlushError::MetadataResolution {
                segment_id,
                reason: format!(
                    "segment belongs to collection {} but replica serves collection {}",
                    segment.collection_id, self.collection_id
                ),
            });
        }
        Ok((segment.collection_id, segment.partition_id))
    }

    fn collection_schema(&self, collection_id: UniqueId, _ts: Timestamp) -> FlushResult<CollectionSchema> {
        if collection_id != self.collection_id {
            return Err(FlushError::MetadataResolution {
                segment_id: -1,
                reason: format!("collection {} is not served by this replica", collection_id),
            });
        }
        self.schema.read().clone().ok_or_else(|| FlushError::MetadataResolution {
            segment_id: -1,
            reason: format!("schema of collection {} is not available", collection_id),
        })
    }

    fn update_segment_checkpoint(&self, segment_id: UniqueId, pos: &LogPosition) {
        if let Some(segment) = self.segments.write().get_mut(&segment_id) {
            segment.checkpoint = Some(pos.clone());
            if segment.state == SegmentState::New {
                segment.state = SegmentState::Normal;
            }
        }
    }

    fn segment_statistics_updates(&self, segment_id: UniqueId) -> FlushResult<SegmentStatisticsUpdates> {
        let segments = self.segments.read();
        let segment = segments.get(&segment_id).ok_or(FlushError::SegmentNotFound(segment_id))?;
        Ok(SegmentStatisticsUpdates {
            segment_id,
            num_rows: segment.num_rows,
        })
    }

    fn list_new_segments_start_positions(&self) -> Vec<SegmentStartPosition> {
        let segments = self.segments.read();
        let mut positions: Vec<SegmentStartPosition> = segments
            .values()
            .filter(|s| s.state == SegmentState::New)
            .filter_map(|s| {
                s.start_position.clone().map(|start_position| SegmentStartPosition {
                    segment_id: s.segment_id,
                    start_position,
                })
            })
            .collect();
        positions.sort_by_key(|p| p.segment_id);
        positions
    }

    fn segment_flushed(&self, segment_id: UniqueId) {
        if let Some(segment) = self.segments.write().get_mut(&segment_id) {
            segment.state = SegmentState::Flushed;
            debug!("🔒 Segment {} marked flushed in replica", segment_id);
        }
    }
}
