// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Datanode flush error types

use thiserror::Error;

use super::types::UniqueId;

pub type FlushResult<T> = std::result::Result<T, FlushError>;

/// Errors raised while flushing segment buffers and reporting them upstream
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlushError {
    #[error("Flush task failed for segment {segment_id}: {reason}")]
    TaskExecution { segment_id: UniqueId, reason: String },

    #[error("Segment not found: {0}")]
    SegmentNotFound(UniqueId),

    #[error("Metadata resolution failed for segment {segment_id}: {reason}")]
    MetadataResolution { segment_id: UniqueId, reason: String },

    #[error("Save binlog paths failed for segment {segment_id}: {reason}")]
    DownstreamSave { segment_id: UniqueId, reason: String },

    #[error("Fatal flush failure on segment {segment_id}: {reason}")]
    Fatal { segment_id: UniqueId, reason: String },

    #[error("Flush queue for segment {0} is halted")]
    SegmentHalted(UniqueId),

    #[error("Injection aborted: {0}")]
    InjectionAborted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("ID allocation error: {0}")]
    Allocation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FlushError {
    /// Whether the owning supervisor must stop the affected segment
    pub fn is_fatal(&self) -> bool {
        matches!(self, FlushError::Fatal { .. } | FlushError::SegmentHalted(_))
    }

    pub fn fatal(segment_id: UniqueId, reason: impl Into<String>) -> Self {
        FlushError::Fatal {
            segment_id,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for FlushError {
    fn from(err: std::io::Error) -> Self {
        FlushError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for FlushError {
    fn from(err: bincode::Error) -> Self {
        FlushError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for FlushError {
    fn from(err: serde_json::Error) -> Self {
        FlushError::Serialization(err.to_string())
    }
}
