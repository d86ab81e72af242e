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

//! ProximaDB Datanode - replays a synthetic flush workload through the flush pipeline

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use proximadb_datanode::core::{
    init_tracing, CollectionSchema, DataNodeConfig, DataType, FieldSchema, FlushError, LogPosition, UniqueId,
};
use proximadb_datanode::datanode::{
    BufferData, DelDataBuf, FieldData, FlushManager, FlushNotifier, FlushingSegmentCache, InMemoryDataCoordinator,
    InMemoryReplica, InsertData, LocalIdAllocator, SegmentReplica, SegmentState, TaskInjection,
};
use proximadb_datanode::storage::{KvStore, LocalKv, MemoryKv};

const VECTOR_DIM: usize = 4;
const ROWS_PER_FLUSH: i64 = 16;
const PARTITION_ID: UniqueId = 1;

#[derive(Parser)]
#[command(name = "proximadb-datanode")]
#[command(about = "ProximaDB datanode ordered flush driver")]
struct Args {
    #[arg(short, long, default_value = "datanode.toml")]
    config: PathBuf,

    /// Number of growing segments to flush
    #[arg(short, long, default_value_t = 4)]
    segments: i64,

    /// Flushes per segment
    #[arg(short, long, default_value_t = 8)]
    flushes: u64,

    /// Write binlogs under this directory instead of memory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,
}

fn collection_schema() -> CollectionSchema {
    CollectionSchema {
        name: "synthetic".to_string(),
        fields: vec![
            FieldSchema { field_id: 100, name: "id".to_string(), data_type: DataType::Int64, is_primary_key: true },
            FieldSchema { field_id: 101, name: "embedding".to_string(), data_type: DataType::FloatVector, is_primary_key: false },
        ],
    }
}

fn insert_buffer(segment_id: UniqueId, flush: u64) -> BufferData {
    let base = segment_id * 1_000_000 + flush as i64 * ROWS_PER_FLUSH;
    let ids: Vec<i64> = (base..base + ROWS_PER_FLUSH).collect();
    let embedding: Vec<f32> = ids
        .iter()
        .flat_map(|id| (0..VECTOR_DIM).map(move |d| (*id as f32) + d as f32 * 0.1))
        .collect();

    let mut fields = HashMap::new();
    fields.insert(100, FieldData::Int64(ids));
    fields.insert(101, FieldData::FloatVector { dim: VECTOR_DIM, data: embedding });
    BufferData::new(InsertData { fields })
}

fn position(segment_id: UniqueId, flush: u64) -> LogPosition {
    let mut msg_id = segment_id.to_be_bytes().to_vec();
    msg_id.extend_from_slice(&flush.to_be_bytes());
    LogPosition::new(msg_id)
        .with_channel(format!("datanode-dml-{}", segment_id))
        .with_timestamp(flush + 1)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        DataNodeConfig::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?
    } else {
        DataNodeConfig::default()
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging);

    if args.segments < 1 {
        bail!("--segments must be at least 1");
    }

    let kv: Arc<dyn KvStore> = match &args.data_dir {
        Some(dir) => Arc::new(LocalKv::new(dir).await?),
        None => Arc::new(MemoryKv::new()),
    };
    info!("🚀 Starting datanode {} with {} backend", config.node_id, kv.backend_name());

    let replica = Arc::new(InMemoryReplica::new(config.collection_id));
    replica.set_schema(collection_schema());
    for segment_id in 1..=args.segments {
        replica.add_segment(segment_id, config.collection_id, PARTITION_ID, Some(position(segment_id, 0)));
    }

    let coordinator = Arc::new(InMemoryDataCoordinator::new());
    let flushing = FlushingSegmentCache::new();
    let notifier = FlushNotifier::new(
        config.collection_id,
        replica.clone(),
        coordinator.clone(),
        flushing.clone(),
        config.flush.notify_retry.clone(),
    )
    .with_node_id(config.node_id.clone());

    let manager = FlushManager::new(
        Arc::new(LocalIdAllocator::default()),
        kv.clone(),
        replica.clone(),
        Arc::new(notifier),
    )
    .with_config(config.flush.clone());
    let mut fatal_events = manager
        .take_fatal_events()
        .context("fatal event receiver already taken")?;

    // Segments replay concurrently; each one submits its flushes in order
    let flushes = args.flushes;
    let workloads = (1..=args.segments).map(|segment_id| {
        let manager = &manager;
        let replica = &replica;
        let flushing = &flushing;
        async move {
            for flush in 0..flushes {
                let pos = position(segment_id, flush);
                let buffer = insert_buffer(segment_id, flush);
                replica.add_rows(segment_id, buffer.size)?;
                flushing.check_or_cache(segment_id);

                let deletes: DelDataBuf = (0..2).map(|i| (segment_id * 1_000_000 + i, flush + 1)).collect();
                manager
                    .flush_buffer_data(Some(buffer), segment_id, false, false, pos.clone())
                    .await?;
                manager.flush_del_data(Some(deletes), segment_id, pos)?;
            }
            Ok::<_, FlushError>(())
        }
    });
    try_join_all(workloads).await?;

    // Seal the first segment behind everything it has queued so far
    let sealed_segment = 1;
    let (injection, handle) = TaskInjection::new(|pack| pack.flushed = true);
    manager.inject_flush(injection, sealed_segment)?;
    handle.resolve().await?;
    info!("🔒 Seal barrier on segment {} resolved", sealed_segment);

    manager
        .flush_buffer_data(None, sealed_segment, true, false, position(sealed_segment, args.flushes))
        .await?;
    manager.flush_del_data(None, sealed_segment, position(sealed_segment, args.flushes))?;

    let expected = args.segments as usize * args.flushes as usize + 1;
    let waited = timeout(Duration::from_secs(30), async {
        loop {
            if coordinator.saved_requests().len() >= expected {
                return Ok(());
            }
            tokio::select! {
                Some(event) = fatal_events.recv() => {
                    bail!("segment {} halted: {}", event.segment_id, event.error);
                }
                _ = sleep(Duration::from_millis(10)) => {}
            }
        }
    })
    .await;
    match waited {
        Ok(result) => result?,
        Err(_) => warn!(
            "⏱️ Timed out with {} of {} packs reported",
            coordinator.saved_requests().len(),
            expected
        ),
    }

    let saved = coordinator.saved_requests();
    let binlogs: usize = saved.iter().map(|r| r.field2_binlog_paths.len()).sum();
    let deltalogs: usize = saved.iter().map(|r| r.deltalogs.len()).sum();
    let sealed: Vec<UniqueId> = (1..=args.segments)
        .filter(|id| replica.segment(*id).map(|s| s.state) == Some(SegmentState::Flushed))
        .collect();

    println!("Datanode {} flush summary", config.node_id);
    println!("  backend:          {}", kv.backend_name());
    println!("  segments:         {}", args.segments);
    println!("  packs reported:   {}/{}", saved.len(), expected);
    println!("  insert binlogs:   {}", binlogs);
    println!("  delta logs:       {}", deltalogs);
    println!("  sealed segments:  {:?}", sealed);
    println!("  still flushing:   {}", flushing.len());
    println!(
        "  rows on segment 1: {}",
        replica.segment_statistics_updates(1).map(|u| u.num_rows).unwrap_or_default()
    );

    Ok(())
}
