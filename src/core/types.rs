// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Shared identifiers and schema types for the datanode

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide unique identifier (segments, collections, partitions, log IDs)
pub type UniqueId = i64;

/// Field identifier inside a collection schema
pub type FieldId = i64;

/// Hybrid timestamp issued by the upstream message stream
pub type Timestamp = u64;

/// Position in the upstream message stream.
///
/// Only `msg_id` identifies a position; two positions with the same message ID
/// pair up as the insert and delete halves of one flush. The byte content is
/// never compared for ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub channel_name: String,
    pub msg_id: Vec<u8>,
    pub msg_group: String,
    pub timestamp: Timestamp,
}

impl LogPosition {
    pub fn new(msg_id: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_id: msg_id.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pairing key of this position
    pub fn key(&self) -> &[u8] {
        &self.msg_id
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@", self.channel_name)?;
        for byte in &self.msg_id {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Column data types understood by the binlog codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int64,
    Float,
    Double,
    VarChar,
    FloatVector,
}

/// Field definition inside a collection schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: FieldId,
    pub name: String,
    pub data_type: DataType,
    pub is_primary_key: bool,
}

/// Collection schema as resolved by the replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    pub fn field(&self, field_id: FieldId) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }
}

/// Metadata needed to turn a segment's buffer into binlogs
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    pub collection_id: UniqueId,
    pub partition_id: UniqueId,
    pub schema: CollectionSchema,
}
