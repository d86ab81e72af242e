// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Set of segments with a flush in flight

use dashmap::DashSet;
use std::sync::Arc;

use crate::core::UniqueId;

#[derive(Debug, Clone, Default)]
pub struct FlushingSegmentCache {
    segments: Arc<DashSet<UniqueId>>,
}

impl FlushingSegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the segment was already flushing
    pub fn check_or_cache(&self, segment_id: UniqueId) -> bool {
        self.segments.insert(segment_id)
    }

    pub fn contains(&self, segment_id: UniqueId) -> bool {
        self.segments.contains(&segment_id)
    }

    pub fn remove(&self, segment_id: UniqueId) {
        self.segments.remove(&segment_id);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
