// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Per-segment ordered flush queue
//!
//! Insert-side and delete-side flushes for the same log position complete on
//! independent Tokio tasks. The queue pairs them up and hands one merged
//! [`SegmentFlushPack`] per position to the packer handler, strictly in the
//! order positions were first enqueued, whatever order the tasks finish in.
//!
//! All bookkeeping lives behind one mutex per queue. Completed packs are pushed
//! onto an in-order channel while that lock is held; a single dispatcher task
//! drains the channel, so handler calls never overlap and barriers
//! ([`TaskInjection`]) can suspend delivery without blocking enqueue callers.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::flush_pack::{DelDataBuf, SegmentFlushPack};
use super::flush_task::FlushTask;
use super::injection::{PostInjectionFn, TaskInjection};
use crate::core::{FieldId, FlushError, FlushResult, LogPosition, UniqueId};

/// Consumer of delivered packs (the packer callback)
#[async_trait]
pub trait FlushPackHandler: Send + Sync {
    /// An `Err` halts the segment's queue and is reported as a fatal event
    async fn handle(&self, pack: SegmentFlushPack) -> FlushResult<()>;
}

/// Adapts a plain closure into a [`FlushPackHandler`]
pub struct PackCallback<F>(F);

impl<F> PackCallback<F>
where
    F: Fn(SegmentFlushPack) -> FlushResult<()> + Send + Sync + 'static,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

#[async_trait]
impl<F> FlushPackHandler for PackCallback<F>
where
    F: Fn(SegmentFlushPack) -> FlushResult<()> + Send + Sync + 'static,
{
    async fn handle(&self, pack: SegmentFlushPack) -> FlushResult<()> {
        (self.0)(pack)
    }
}

/// Raised once when a queue halts on a handler failure
#[derive(Debug, Clone)]
pub struct FatalFlushEvent {
    pub segment_id: UniqueId,
    pub error: FlushError,
    /// Accepted positions that will never be delivered, in submission order
    pub discarded: Vec<LogPosition>,
}

/// Flush state of one first-seen log position
#[derive(Default)]
struct PendingEntry {
    pos: LogPosition,
    insert_registered: bool,
    delete_registered: bool,
    insert_done: bool,
    delete_done: bool,
    insert_logs: HashMap<FieldId, String>,
    stats_logs: HashMap<FieldId, String>,
    delta_logs: Vec<DelDataBuf>,
    flushed: bool,
    dropped: bool,
    err: Option<FlushError>,
}

impl PendingEntry {
    fn is_complete(&self) -> bool {
        self.insert_done && self.delete_done
    }

    fn record_error(&mut self, err: FlushError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn into_pack(self, segment_id: UniqueId, collection_id: UniqueId, partition_id: UniqueId) -> SegmentFlushPack {
        SegmentFlushPack {
            segment_id,
            collection_id,
            partition_id,
            insert_logs: self.insert_logs,
            stats_logs: self.stats_logs,
            delta_logs: self.delta_logs,
            flushed: self.flushed,
            dropped: self.dropped,
            pos: self.pos,
            err: self.err,
        }
    }
}

enum Slot {
    Flush(Vec<u8>),
    Barrier(TaskInjection),
}

enum Dispatch {
    Pack(SegmentFlushPack),
    Inject(TaskInjection),
}

enum Completion {
    Insert {
        insert_logs: HashMap<FieldId, String>,
        stats_logs: HashMap<FieldId, String>,
        flushed: bool,
        dropped: bool,
        err: Option<FlushError>,
    },
    Delete {
        buf: DelDataBuf,
        err: Option<FlushError>,
    },
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Insert,
    Delete,
}

struct QueueState {
    /// Message ID => pending flush
    working: HashMap<Vec<u8>, PendingEntry>,
    /// Submission order of positions and barriers
    order: VecDeque<Slot>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    /// `(collection_id, partition_id)` stamped on packs as they leave the queue
    location: (UniqueId, UniqueId),
    halted: bool,
}

impl QueueState {
    /// Register `side` for `pos`, appending the position on first sight
    fn register(&mut self, segment_id: UniqueId, pos: &LogPosition, side: Side) -> FlushResult<&mut PendingEntry> {
        if self.halted {
            return Err(FlushError::SegmentHalted(segment_id));
        }

        let key = pos.key().to_vec();
        if !self.working.contains_key(&key) {
            self.order.push_back(Slot::Flush(key.clone()));
        }
        let entry = self.working.entry(key).or_insert_with(|| PendingEntry {
            pos: pos.clone(),
            ..Default::default()
        });

        let registered = match side {
            Side::Insert => &mut entry.insert_registered,
            Side::Delete => &mut entry.delete_registered,
        };
        if *registered {
            warn!(
                "⚠️ Segment {} position {} already has a {:?} flush in progress, rejecting",
                segment_id, pos, side
            );
            return Err(FlushError::InvalidInput(format!(
                "duplicate {:?} flush for segment {} at {}",
                side, segment_id, pos
            )));
        }
        *registered = true;
        Ok(entry)
    }
}

struct QueueInner {
    segment_id: UniqueId,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn complete(&self, key: &[u8], completion: Completion) {
        let mut state = self.state.lock();
        let Some(entry) = state.working.get_mut(key) else {
            warn!("⚠️ Segment {} got a completion for an unknown position", self.segment_id);
            return;
        };

        match completion {
            Completion::Insert { insert_logs, stats_logs, flushed, dropped, err } => {
                entry.insert_logs.extend(insert_logs);
                entry.stats_logs.extend(stats_logs);
                entry.flushed = flushed;
                entry.dropped = dropped;
                entry.insert_done = true;
                if let Some(err) = err {
                    entry.record_error(err);
                }
            }
            Completion::Delete { buf, err } => {
                entry.delta_logs.push(buf);
                entry.delete_done = true;
                if let Some(err) = err {
                    entry.record_error(err);
                }
            }
        }

        self.drain_ready(&mut state);
    }

    /// Move every deliverable slot at the front of the queue to the dispatcher
    fn drain_ready(&self, state: &mut QueueState) {
        loop {
            let ready = match state.order.front() {
                None => false,
                Some(Slot::Barrier(_)) => true,
                Some(Slot::Flush(key)) => state.working.get(key).map_or(true, PendingEntry::is_complete),
            };
            if !ready {
                break;
            }

            let dispatch = match state.order.pop_front() {
                Some(Slot::Barrier(injection)) => Dispatch::Inject(injection),
                Some(Slot::Flush(key)) => match state.working.remove(&key) {
                    Some(entry) => {
                        debug!("📦 Segment {} position {} ready for delivery", self.segment_id, entry.pos);
                        let (collection_id, partition_id) = state.location;
                        Dispatch::Pack(entry.into_pack(self.segment_id, collection_id, partition_id))
                    }
                    None => continue,
                },
                None => break,
            };

            if state.dispatch_tx.send(dispatch).is_err() {
                debug!("Segment {} dispatcher stopped, dropping ready slot", self.segment_id);
            }
        }
    }

    /// Refuse further work and drop everything still queued.
    ///
    /// Returns the positions that were accepted but not yet handed to the dispatcher.
    fn halt(&self) -> Vec<LogPosition> {
        let mut state = self.state.lock();
        state.halted = true;
        let order = std::mem::take(&mut state.order);
        let mut discarded = Vec::with_capacity(order.len());
        for slot in order {
            if let Slot::Flush(key) = slot {
                if let Some(entry) = state.working.remove(&key) {
                    discarded.push(entry.pos);
                }
            }
        }
        state.working.clear();
        discarded
    }
}

/// Ordered flush queue for one segment. Cloning shares the same queue.
#[derive(Clone)]
pub struct OrderFlushQueue {
    inner: Arc<QueueInner>,
}

impl OrderFlushQueue {
    /// Create the queue and spawn its dispatcher; must run inside a Tokio runtime.
    pub fn new(
        segment_id: UniqueId,
        collection_id: UniqueId,
        partition_id: UniqueId,
        handler: Arc<dyn FlushPackHandler>,
        fatal_tx: mpsc::UnboundedSender<FatalFlushEvent>,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(QueueInner {
            segment_id,
            state: Mutex::new(QueueState {
                working: HashMap::new(),
                order: VecDeque::new(),
                dispatch_tx,
                location: (collection_id, partition_id),
                halted: false,
            }),
        });

        tokio::spawn(dispatch_loop(segment_id, dispatch_rx, handler, fatal_tx, Arc::downgrade(&inner)));
        debug!("🆕 Created flush queue for segment {}", segment_id);

        Self { inner }
    }

    pub fn segment_id(&self) -> UniqueId {
        self.inner.segment_id
    }

    /// Number of positions waiting for one of their sides or an earlier position
    pub fn pending(&self) -> usize {
        self.inner.state.lock().working.len()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.state.lock().halted
    }

    /// `(collection_id, partition_id)` currently stamped on outgoing packs
    pub fn location(&self) -> (UniqueId, UniqueId) {
        self.inner.state.lock().location
    }

    /// Stamp packs that have not left the queue yet with a new location
    pub fn relocate(&self, collection_id: UniqueId, partition_id: UniqueId) {
        let mut state = self.inner.state.lock();
        if state.location != (collection_id, partition_id) {
            debug!(
                "📍 Segment {} packs now located at collection {}, partition {}",
                self.inner.segment_id, collection_id, partition_id
            );
            state.location = (collection_id, partition_id);
        }
    }

    /// Schedule the insert side of `pos`. Returns once the task is spawned.
    pub fn enqueue_insert_flush(
        &self,
        task: Arc<dyn FlushTask>,
        insert_logs: HashMap<FieldId, String>,
        stats_logs: HashMap<FieldId, String>,
        flushed: bool,
        dropped: bool,
        pos: LogPosition,
    ) -> FlushResult<()> {
        let segment_id = self.inner.segment_id;
        self.inner.state.lock().register(segment_id, &pos, Side::Insert)?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let err = task.flush_insert_data().await.err().map(|e| {
                warn!("❌ Insert flush failed for segment {} at {}: {}", segment_id, pos, e);
                FlushError::TaskExecution {
                    segment_id,
                    reason: e.to_string(),
                }
            });
            inner.complete(
                pos.key(),
                Completion::Insert {
                    insert_logs,
                    stats_logs,
                    flushed,
                    dropped,
                    err,
                },
            );
        });
        Ok(())
    }

    /// Schedule the delete side of `pos`.
    ///
    /// A missing or empty buffer completes the side immediately, without spawning.
    pub fn enqueue_del_flush(&self, task: Arc<dyn FlushTask>, buf: Option<DelDataBuf>, pos: LogPosition) -> FlushResult<()> {
        let segment_id = self.inner.segment_id;
        let buf = match buf.filter(|b| !b.is_empty()) {
            Some(buf) => buf,
            None => {
                let mut state = self.inner.state.lock();
                state.register(segment_id, &pos, Side::Delete)?.delete_done = true;
                self.inner.drain_ready(&mut state);
                return Ok(());
            }
        };

        self.inner.state.lock().register(segment_id, &pos, Side::Delete)?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let err = task.flush_delete_data().await.err().map(|e| {
                warn!("❌ Delete flush failed for segment {} at {}: {}", segment_id, pos, e);
                FlushError::TaskExecution {
                    segment_id,
                    reason: e.to_string(),
                }
            });
            inner.complete(pos.key(), Completion::Delete { buf, err });
        });
        Ok(())
    }

    /// Place a barrier behind every position queued so far
    pub fn inject_flush(&self, injection: TaskInjection) -> FlushResult<()> {
        let mut state = self.inner.state.lock();
        if state.halted {
            return Err(FlushError::SegmentHalted(self.inner.segment_id));
        }
        state.order.push_back(Slot::Barrier(injection));
        debug!(
            "💉 Injection queued for segment {} behind {} pending positions",
            self.inner.segment_id,
            state.working.len()
        );
        self.inner.drain_ready(&mut state);
        Ok(())
    }
}

async fn dispatch_loop(
    segment_id: UniqueId,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    handler: Arc<dyn FlushPackHandler>,
    fatal_tx: mpsc::UnboundedSender<FatalFlushEvent>,
    queue: Weak<QueueInner>,
) {
    let mut post_injection: Option<PostInjectionFn> = None;

    while let Some(dispatch) = rx.recv().await {
        let result = match dispatch {
            Dispatch::Pack(pack) => deliver(handler.as_ref(), post_injection.as_ref(), pack).await,
            Dispatch::Inject(injection) => {
                info!("💉 Segment {} reached injection barrier, waiting for proceed", segment_id);
                match injection.rendezvous().await {
                    Some(accepted) => {
                        info!("💉 Segment {} injection accepted, resuming delivery", segment_id);
                        post_injection = Some(accepted.post_injection);
                        match accepted.pack {
                            Some(pack) => deliver(handler.as_ref(), post_injection.as_ref(), pack).await,
                            None => Ok(()),
                        }
                    }
                    None => {
                        info!("💉 Segment {} injection declined, resuming delivery", segment_id);
                        Ok(())
                    }
                }
            }
        };

        if let Err(err) = result {
            // no enqueue succeeds past this point
            let pending = queue.upgrade().map(|q| q.halt()).unwrap_or_default();

            // Slots already handed over precede everything still pending
            rx.close();
            let mut discarded = Vec::new();
            while let Ok(dispatch) = rx.try_recv() {
                if let Dispatch::Pack(pack) = dispatch {
                    discarded.push(pack.pos);
                }
            }
            discarded.extend(pending);

            error!(
                "🛑 Flush pack delivery failed for segment {}, halted its queue and discarded {} positions: {}",
                segment_id,
                discarded.len(),
                err
            );
            let _ = fatal_tx.send(FatalFlushEvent {
                segment_id,
                error: err,
                discarded,
            });
            return;
        }
    }

    debug!("Segment {} dispatcher finished", segment_id);
}

async fn deliver(
    handler: &dyn FlushPackHandler,
    post_injection: Option<&PostInjectionFn>,
    mut pack: SegmentFlushPack,
) -> FlushResult<()> {
    if let Some(post_injection) = post_injection {
        post_injection(&mut pack);
    }
    debug!(
        "🚚 Delivering flush pack for segment {} at {} (flushed={}, dropped={}, err={})",
        pack.segment_id,
        pack.pos,
        pack.flushed,
        pack.dropped,
        pack.err.is_some()
    );
    handler.handle(pack).await
}
