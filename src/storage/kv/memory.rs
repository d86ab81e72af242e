// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! In-Memory KV Backend
//!
//! Ideal for testing and development. No durability guarantees.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::KvStore;
use crate::core::FlushResult;

/// In-memory key-value backend
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Keys starting with `prefix`, sorted
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = data.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> FlushResult<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> FlushResult<()> {
        let mut data = self.data.write().await;
        data.extend(kvs);
        Ok(())
    }

    async fn load(&self, key: &str) -> FlushResult<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> FlushResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        kv.save("a/1", b"one".to_vec()).await.unwrap();

        let mut batch = HashMap::new();
        batch.insert("a/2".to_string(), b"two".to_vec());
        batch.insert("b/1".to_string(), b"three".to_vec());
        kv.multi_save(batch).await.unwrap();

        assert_eq!(kv.len().await, 3);
        assert_eq!(kv.load("a/2").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(kv.keys_with_prefix("a/").await, vec!["a/1".to_string(), "a/2".to_string()]);

        kv.remove("a/1").await.unwrap();
        assert_eq!(kv.load("a/1").await.unwrap(), None);
    }
}
