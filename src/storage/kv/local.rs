// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Local filesystem KV backend. Keys map to relative file paths under a root directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::KvStore;
use crate::core::{FlushError, FlushResult};

#[derive(Debug, Clone)]
pub struct LocalKv {
    root_dir: PathBuf,
    sync_enabled: bool,
}

impl LocalKv {
    /// Create a backend rooted at `root_dir`, creating the directory if needed
    pub async fn new(root_dir: impl Into<PathBuf>) -> FlushResult<Self> {
        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir).await?;
        if !root_dir.is_dir() {
            return Err(FlushError::Storage(format!(
                "Root path is not a directory: {}",
                root_dir.display()
            )));
        }
        Ok(Self {
            root_dir,
            sync_enabled: true,
        })
    }

    pub fn with_sync(mut self, sync_enabled: bool) -> Self {
        self.sync_enabled = sync_enabled;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Resolve key relative to root; keys may not escape it
    fn resolve_path(&self, key: &str) -> FlushResult<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative.as_os_str().is_empty() || relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(FlushError::InvalidInput(format!("invalid key: {:?}", key)));
        }
        Ok(self.root_dir.join(relative))
    }

    async fn write_file(&self, key: &str, data: &[u8]) -> FlushResult<()> {
        let path = self.resolve_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        if self.sync_enabled {
            file.sync_all().await?;
        }
        debug!("💾 Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl KvStore for LocalKv {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn save(&self, key: &str, value: Vec<u8>) -> FlushResult<()> {
        self.write_file(key, &value).await
    }

    async fn multi_save(&self, kvs: HashMap<String, Vec<u8>>) -> FlushResult<()> {
        for (key, value) in &kvs {
            self.write_file(key, value).await?;
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> FlushResult<Option<Vec<u8>>> {
        let path = self.resolve_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> FlushResult<()> {
        let path = self.resolve_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_kv_creates_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        let kv = LocalKv::new(temp_dir.path()).await.unwrap().with_sync(false);

        let mut batch = HashMap::new();
        batch.insert("files/insert_log/1/2/3/100/7".to_string(), vec![1, 2, 3]);
        batch.insert("files/stats_log/1/2/3/100/8".to_string(), vec![4]);
        kv.multi_save(batch).await.unwrap();

        assert!(temp_dir.path().join("files/insert_log/1/2/3/100/7").is_file());
        assert_eq!(kv.load("files/stats_log/1/2/3/100/8").await.unwrap(), Some(vec![4]));
        assert_eq!(kv.load("files/missing").await.unwrap(), None);

        kv.remove("files/stats_log/1/2/3/100/8").await.unwrap();
        kv.remove("files/stats_log/1/2/3/100/8").await.unwrap();
        assert_eq!(kv.load("files/stats_log/1/2/3/100/8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_kv_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let kv = LocalKv::new(temp_dir.path()).await.unwrap();

        let result = kv.save("../outside", vec![0]).await;
        assert!(matches!(result, Err(FlushError::InvalidInput(_))));
        assert!(kv.load("").await.is_err());
    }
}
