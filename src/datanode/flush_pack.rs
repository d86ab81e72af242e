// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Merged flush results and delete buffers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{FieldId, FlushError, LogPosition, Timestamp, UniqueId};

/// Primary keys deleted in a segment along with their delete timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteData {
    pub pks: Vec<i64>,
    pub tss: Vec<Timestamp>,
}

impl DeleteData {
    pub fn len(&self) -> usize {
        self.pks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pks.is_empty()
    }
}

/// Buffered deletes for one segment, plus the delta log they were written to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelDataBuf {
    pub delete_data: DeleteData,
    /// Number of buffered delete entries
    pub size: i64,
    pub ts_from: Timestamp,
    pub ts_to: Timestamp,
    pub file_path: String,
    pub file_size: i64,
}

impl DelDataBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pk: i64, ts: Timestamp) {
        if self.delete_data.is_empty() || ts < self.ts_from {
            self.ts_from = ts;
        }
        if self.delete_data.is_empty() || ts > self.ts_to {
            self.ts_to = ts;
        }
        self.delete_data.pks.push(pk);
        self.delete_data.tss.push(ts);
        self.size += 1;
    }

    /// Nothing to flush on the delete side
    pub fn is_empty(&self) -> bool {
        self.delete_data.is_empty()
    }
}

impl FromIterator<(i64, Timestamp)> for DelDataBuf {
    fn from_iter<I: IntoIterator<Item = (i64, Timestamp)>>(iter: I) -> Self {
        let mut buf = DelDataBuf::new();
        for (pk, ts) in iter {
            buf.push(pk, ts);
        }
        buf
    }
}

/// Result of one segment's insert and delete flush at one log position.
///
/// When `err` is set the path fields carry no meaning downstream, but the pack
/// is still delivered exactly once.
#[derive(Debug, Clone, Default)]
pub struct SegmentFlushPack {
    pub segment_id: UniqueId,
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub insert_logs: HashMap<FieldId, String>,
    pub stats_logs: HashMap<FieldId, String>,
    pub delta_logs: Vec<DelDataBuf>,
    /// Segment is sealed by this pack
    pub flushed: bool,
    pub dropped: bool,
    pub pos: LogPosition,
    pub err: Option<FlushError>,
}

impl SegmentFlushPack {
    pub fn new(segment_id: UniqueId, pos: LogPosition) -> Self {
        Self {
            segment_id,
            pos,
            ..Default::default()
        }
    }

    pub fn with_location(mut self, collection_id: UniqueId, partition_id: UniqueId) -> Self {
        self.collection_id = collection_id;
        self.partition_id = partition_id;
        self
    }

    pub fn with_insert_logs(mut self, insert_logs: HashMap<FieldId, String>, stats_logs: HashMap<FieldId, String>) -> Self {
        self.insert_logs = insert_logs;
        self.stats_logs = stats_logs;
        self
    }

    pub fn with_delta_log(mut self, buf: DelDataBuf) -> Self {
        self.delta_logs.push(buf);
        self
    }

    pub fn with_flags(mut self, flushed: bool, dropped: bool) -> Self {
        self.flushed = flushed;
        self.dropped = dropped;
        self
    }

    pub fn with_error(mut self, err: FlushError) -> Self {
        self.err = Some(err);
        self
    }

    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }
}
