/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # ProximaDB Datanode - Ordered Segment Flush
//!
//! Flush coordination for a datanode's growing segments:
//!
//! - **Ordered delivery**: one flush pack per log position, in first-enqueue order
//! - **Concurrent writes**: insert and delete binlogs flush on independent tasks
//! - **Injection barriers**: callers can pause a segment's delivery and splice a pack
//! - **Fatal escalation**: a failed report halts the segment and notifies the supervisor

pub mod core;
pub mod datanode;
pub mod storage;
pub mod utils;

pub use crate::core::{
    init_tracing, DataNodeConfig, FlushConfig, FlushError, FlushResult, LogPosition, RetryConfig, UniqueId,
};
pub use crate::datanode::{
    FatalFlushEvent, FlushManager, FlushNotifier, FlushPackHandler, OrderFlushQueue, SegmentFlushPack,
    TaskInjection,
};
