// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Datanode flush pipeline
//!
//! Buffered inserts and deletes of a segment are serialized into binlogs by
//! the [`FlushManager`], written by [`FlushTask`]s running concurrently, and
//! merged back into one [`SegmentFlushPack`] per log position by the segment's
//! [`OrderFlushQueue`]. Packs leave the queue in submission order and are
//! reported to the data coordinator by the [`FlushNotifier`].

pub mod allocator;
pub mod binlog;
pub mod cache;
pub mod coordinator;
pub mod flush_manager;
pub mod flush_pack;
pub mod flush_queue;
pub mod flush_task;
pub mod injection;
pub mod notify;
pub mod replica;

pub use allocator::{IdAllocator, LocalIdAllocator};
pub use binlog::{BincodeBinlogCodec, BinlogCodec, Blob, BufferData, FieldData, InsertData};
pub use cache::FlushingSegmentCache;
pub use coordinator::{DataCoordinator, InMemoryDataCoordinator, SaveBinlogPathsRequest, Status};
pub use flush_manager::FlushManager;
pub use flush_pack::{DelDataBuf, DeleteData, SegmentFlushPack};
pub use flush_queue::{FatalFlushEvent, FlushPackHandler, OrderFlushQueue, PackCallback};
pub use flush_task::{EmptyFlushTask, FlushTask, KvFlushTask};
pub use injection::{InjectionHandle, TaskInjection};
pub use notify::FlushNotifier;
pub use replica::{InMemoryReplica, SegmentReplica, SegmentState};
