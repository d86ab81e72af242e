// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Key-value backends for binlog blobs and segment checkpoints
//!
//! Flush tasks write serialized binlogs through [`KvStore::multi_save`]; the
//! flush manager persists per-segment checkpoints through [`KvStore::save`].

use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::FlushResult;

pub mod local;
pub mod memory;

pub use local::LocalKv;
pub use memory::MemoryKv;

/// Durable key-value store used by the flush path
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    async fn save(&self, key: &str, value: Vec<u8>) -> FlushResult<()>;

    /// Persist every entry; on error some entries may already be written
    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> FlushResult<()>;

    async fn load(&self, key: &str) -> FlushResult<Option<Vec<u8>>>;

    async fn remove(&self, key: &str) -> FlushResult<()>;
}
