// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Log ID allocation for binlog object paths

use std::sync::atomic::{AtomicI64, Ordering};

use crate::core::{FlushError, FlushResult, UniqueId};

/// Hands out cluster-unique log IDs
pub trait IdAllocator: Send + Sync {
    /// Reserve `count` consecutive IDs, returned as `[start, end)`
    fn alloc_id_batch(&self, count: u32) -> FlushResult<(UniqueId, UniqueId)>;

    fn alloc_id(&self) -> FlushResult<UniqueId> {
        let (start, _) = self.alloc_id_batch(1)?;
        Ok(start)
    }
}

/// Node-local monotonically increasing allocator
#[derive(Debug)]
pub struct LocalIdAllocator {
    next: AtomicI64,
}

impl LocalIdAllocator {
    pub fn new(start: UniqueId) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }
}

impl Default for LocalIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdAllocator for LocalIdAllocator {
    fn alloc_id_batch(&self, count: u32) -> FlushResult<(UniqueId, UniqueId)> {
        let count = i64::from(count);
        let start = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(count))
            .map_err(|_| FlushError::Allocation(format!("log ID space exhausted allocating {}", count)))?;
        Ok((start, start + count))
    }
}
