// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Data coordinator boundary: binlog path registration for flushed segments

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::{FieldId, FlushError, FlushResult, LogPosition, Timestamp, UniqueId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinlog {
    pub field_id: FieldId,
    pub binlogs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaLogInfo {
    pub record_entries: u64,
    pub timestamp_from: Timestamp,
    pub timestamp_to: Timestamp,
    pub delta_log_path: String,
    pub delta_log_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPoint {
    pub segment_id: UniqueId,
    pub num_of_rows: i64,
    pub position: LogPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStartPosition {
    pub segment_id: UniqueId,
    pub start_position: LogPosition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveBinlogPathsRequest {
    pub source_id: String,
    pub segment_id: UniqueId,
    pub collection_id: UniqueId,
    pub field2_binlog_paths: Vec<FieldBinlog>,
    pub field2_statslog_paths: Vec<FieldBinlog>,
    pub deltalogs: Vec<DeltaLogInfo>,
    pub checkpoints: Vec<CheckPoint>,
    pub start_positions: Vec<SegmentStartPosition>,
    pub flushed: bool,
    pub dropped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    UnexpectedError,
    SegmentNotFound,
    MetaFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub error_code: ErrorCode,
    pub reason: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            error_code: ErrorCode::Success,
            reason: String::new(),
        }
    }

    pub fn error(error_code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            error_code,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == ErrorCode::Success
    }
}

/// Cluster metadata service that records which binlogs make up a segment
#[async_trait]
pub trait DataCoordinator: Send + Sync {
    /// `Err` means the call itself failed (transport); a non-success `Status`
    /// means the coordinator rejected the request
    async fn save_binlog_paths(&self, req: SaveBinlogPathsRequest) -> FlushResult<Status>;
}

/// In-process coordinator that records every accepted request.
///
/// The failure toggles make it answer with a non-success status or fail the call outright.
#[derive(Debug, Default)]
pub struct InMemoryDataCoordinator {
    saved: Mutex<Vec<SaveBinlogPathsRequest>>,
    calls: AtomicUsize,
    save_not_success: AtomicBool,
    save_error: AtomicBool,
}

impl InMemoryDataCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_save_not_success(&self, enabled: bool) {
        self.save_not_success.store(enabled, Ordering::SeqCst);
    }

    pub fn set_save_error(&self, enabled: bool) {
        self.save_error.store(enabled, Ordering::SeqCst);
    }

    /// Total save calls, accepted or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saved_requests(&self) -> Vec<SaveBinlogPathsRequest> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl DataCoordinator for InMemoryDataCoordinator {
    async fn save_binlog_paths(&self, req: SaveBinlogPathsRequest) -> FlushResult<Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.save_error.load(Ordering::SeqCst) {
            return Err(FlushError::DownstreamSave {
                segment_id: req.segment_id,
                reason: "mocked coordinator connection error".to_string(),
            });
        }
        if self.save_not_success.load(Ordering::SeqCst) {
            return Ok(Status::error(ErrorCode::UnexpectedError, "mocked save failure"));
        }

        self.saved.lock().push(req);
        Ok(Status::success())
    }
}
