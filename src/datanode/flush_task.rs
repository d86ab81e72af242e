// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Flush tasks: the units of work that persist a segment's buffered data

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::FlushResult;
use crate::storage::kv::KvStore;

/// Persists buffered insert-side and delete-side data.
///
/// Each side is invoked at most once per task by the flush queue.
#[async_trait]
pub trait FlushTask: Send + Sync {
    async fn flush_insert_data(&self) -> FlushResult<()>;

    async fn flush_delete_data(&self) -> FlushResult<()>;
}

/// Task with nothing to persist; used for empty flush signals
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyFlushTask;

#[async_trait]
impl FlushTask for EmptyFlushTask {
    async fn flush_insert_data(&self) -> FlushResult<()> {
        Ok(())
    }

    async fn flush_delete_data(&self) -> FlushResult<()> {
        Ok(())
    }
}

/// Task that writes serialized binlog blobs into a [`KvStore`]
pub struct KvFlushTask {
    kv: Arc<dyn KvStore>,
    insert_kvs: HashMap<String, Vec<u8>>,
    delete_kvs: HashMap<String, Vec<u8>>,
}

impl KvFlushTask {
    /// Insert binlogs plus stats logs, keyed by full object path
    pub fn for_insert(kv: Arc<dyn KvStore>, kvs: HashMap<String, Vec<u8>>) -> Self {
        Self {
            kv,
            insert_kvs: kvs,
            delete_kvs: HashMap::new(),
        }
    }

    /// Delta binlog keyed by full object path
    pub fn for_delete(kv: Arc<dyn KvStore>, kvs: HashMap<String, Vec<u8>>) -> Self {
        Self {
            kv,
            insert_kvs: HashMap::new(),
            delete_kvs: kvs,
        }
    }

    async fn save_all(&self, kvs: &HashMap<String, Vec<u8>>) -> FlushResult<()> {
        if kvs.is_empty() {
            return Ok(());
        }
        let bytes: usize = kvs.values().map(Vec::len).sum();
        self.kv.multi_save(kvs.clone()).await?;
        debug!(
            "💾 Saved {} binlog blobs ({} bytes) to {} backend",
            kvs.len(),
            bytes,
            self.kv.backend_name()
        );
        Ok(())
    }
}

#[async_trait]
impl FlushTask for KvFlushTask {
    async fn flush_insert_data(&self) -> FlushResult<()> {
        self.save_all(&self.insert_kvs).await
    }

    async fn flush_delete_data(&self) -> FlushResult<()> {
        self.save_all(&self.delete_kvs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKv;

    #[tokio::test]
    async fn test_kv_task_writes_only_its_side() {
        let kv = MemoryKv::new();
        let mut kvs = HashMap::new();
        kvs.insert("files/insert_log/1/2/3/100/1".to_string(), vec![9; 16]);

        let task = KvFlushTask::for_insert(Arc::new(kv.clone()), kvs);
        task.flush_delete_data().await.unwrap();
        assert!(kv.is_empty().await);

        task.flush_insert_data().await.unwrap();
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_task_is_noop() {
        let task = EmptyFlushTask;
        assert!(task.flush_insert_data().await.is_ok());
        assert!(task.flush_delete_data().await.is_ok());
    }
}
