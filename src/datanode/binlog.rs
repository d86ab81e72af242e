// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Binlog encoding and object path layout
//!
//! Insert binlogs hold one column per blob, keyed by field ID. Stats logs
//! carry min/max of the primary key. Delta logs hold the deleted primary keys
//! with their timestamps.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::flush_pack::DeleteData;
use crate::core::{CollectionSchema, DataType, FieldId, FlushError, FlushResult, UniqueId};

/// Column values of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    VarChar(Vec<String>),
    FloatVector { dim: usize, data: Vec<f32> },
}

impl FieldData {
    pub fn row_count(&self) -> usize {
        match self {
            FieldData::Bool(v) => v.len(),
            FieldData::Int64(v) => v.len(),
            FieldData::Float(v) => v.len(),
            FieldData::Double(v) => v.len(),
            FieldData::VarChar(v) => v.len(),
            FieldData::FloatVector { dim, data } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / dim
                }
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            FieldData::Bool(_) => DataType::Bool,
            FieldData::Int64(_) => DataType::Int64,
            FieldData::Float(_) => DataType::Float,
            FieldData::Double(_) => DataType::Double,
            FieldData::VarChar(_) => DataType::VarChar,
            FieldData::FloatVector { .. } => DataType::FloatVector,
        }
    }
}

/// Buffered insert rows of one segment, column-major
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertData {
    pub fields: HashMap<FieldId, FieldData>,
}

impl InsertData {
    pub fn row_count(&self) -> usize {
        self.fields.values().map(FieldData::row_count).max().unwrap_or(0)
    }
}

/// Insert buffer handed to the flush manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferData {
    pub buffer: InsertData,
    /// Buffered row count
    pub size: i64,
}

impl BufferData {
    pub fn new(buffer: InsertData) -> Self {
        let size = buffer.row_count() as i64;
        Self { buffer, size }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0 || self.buffer.fields.is_empty()
    }
}

/// Serialized binlog. For insert and stats logs the key is the field ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub key: String,
    pub value: Vec<u8>,
}

impl Blob {
    pub fn field_id(&self) -> FlushResult<FieldId> {
        self.key
            .parse()
            .map_err(|_| FlushError::Serialization(format!("blob key {:?} is not a field ID", self.key)))
    }
}

/// Primary key statistics stored in a stats log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryKeyStats {
    pub field_id: FieldId,
    pub min: i64,
    pub max: i64,
    pub num_rows: usize,
}

/// Turns buffered rows into binlog blobs
pub trait BinlogCodec: Send + Sync {
    /// Returns `(insert binlogs, stats logs)`
    fn serialize_insert(
        &self,
        schema: &CollectionSchema,
        partition_id: UniqueId,
        segment_id: UniqueId,
        data: &InsertData,
    ) -> FlushResult<(Vec<Blob>, Vec<Blob>)>;

    fn serialize_delete(
        &self,
        collection_id: UniqueId,
        partition_id: UniqueId,
        segment_id: UniqueId,
        data: &DeleteData,
    ) -> FlushResult<Blob>;
}

#[derive(Serialize)]
struct InsertBinlog<'a> {
    partition_id: UniqueId,
    segment_id: UniqueId,
    field_id: FieldId,
    data: &'a FieldData,
}

#[derive(Serialize)]
struct DeleteBinlog<'a> {
    collection_id: UniqueId,
    partition_id: UniqueId,
    segment_id: UniqueId,
    data: &'a DeleteData,
}

/// Bincode columns, JSON stats
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeBinlogCodec;

impl BinlogCodec for BincodeBinlogCodec {
    fn serialize_insert(
        &self,
        schema: &CollectionSchema,
        partition_id: UniqueId,
        segment_id: UniqueId,
        data: &InsertData,
    ) -> FlushResult<(Vec<Blob>, Vec<Blob>)> {
        let rows = data.row_count();
        let mut field_ids: Vec<&FieldId> = data.fields.keys().collect();
        field_ids.sort();

        let mut binlogs = Vec::with_capacity(field_ids.len());
        let mut statslogs = Vec::new();

        for field_id in field_ids {
            let column = &data.fields[field_id];
            let field = schema.field(*field_id).ok_or_else(|| {
                FlushError::Serialization(format!("field {} not in schema {}", field_id, schema.name))
            })?;
            if field.data_type != column.data_type() {
                return Err(FlushError::Serialization(format!(
                    "field {} expects {:?}, got {:?}",
                    field_id,
                    field.data_type,
                    column.data_type()
                )));
            }
            if column.row_count() != rows {
                return Err(FlushError::Serialization(format!(
                    "field {} has {} rows, expected {}",
                    field_id,
                    column.row_count(),
                    rows
                )));
            }

            let value = bincode::serialize(&InsertBinlog {
                partition_id,
                segment_id,
                field_id: *field_id,
                data: column,
            })?;
            binlogs.push(Blob {
                key: field_id.to_string(),
                value,
            });

            if let (true, FieldData::Int64(pks)) = (field.is_primary_key, column) {
                let stats = PrimaryKeyStats {
                    field_id: *field_id,
                    min: pks.iter().copied().min().unwrap_or_default(),
                    max: pks.iter().copied().max().unwrap_or_default(),
                    num_rows: pks.len(),
                };
                statslogs.push(Blob {
                    key: field_id.to_string(),
                    value: serde_json::to_vec(&stats)?,
                });
            }
        }

        Ok((binlogs, statslogs))
    }

    fn serialize_delete(
        &self,
        collection_id: UniqueId,
        partition_id: UniqueId,
        segment_id: UniqueId,
        data: &DeleteData,
    ) -> FlushResult<Blob> {
        if data.pks.len() != data.tss.len() {
            return Err(FlushError::Serialization(format!(
                "delete data has {} primary keys but {} timestamps",
                data.pks.len(),
                data.tss.len()
            )));
        }
        let value = bincode::serialize(&DeleteBinlog {
            collection_id,
            partition_id,
            segment_id,
            data,
        })?;
        Ok(Blob {
            key: segment_id.to_string(),
            value,
        })
    }
}

/// `1/2/3` style path segment from IDs
pub fn join_id_path(ids: &[UniqueId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("/")
}

/// Object path of a binlog under `root`
pub fn binlog_path(root: &str, ids: &[UniqueId]) -> String {
    format!("{}/{}", root.trim_end_matches('/'), join_id_path(ids))
}
