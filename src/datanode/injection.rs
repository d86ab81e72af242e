// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! One-shot delivery barriers for a segment's flush queue
//!
//! An injection is placed behind every position already queued. When the
//! queue's delivery cursor reaches it, the queue signals readiness and stops
//! emitting packs until the injecting caller gives its verdict:
//!
//! ```text
//! caller                          queue dispatcher
//!   inject_flush(injection) ───►  ... deliver earlier packs ...
//!   handle.injected().await  ◄──  ready
//!   (coordinate, e.g. seal)        (suspended)
//!   handle.proceed(true)     ───►  install post-injection, splice pack, resume
//! ```

use std::sync::Arc;
use tokio::sync::oneshot;

use super::flush_pack::SegmentFlushPack;
use crate::core::{FlushError, FlushResult};

/// Mutation applied to packs delivered after an accepted injection
pub type PostInjectionFn = Arc<dyn Fn(&mut SegmentFlushPack) + Send + Sync>;

/// Barrier descriptor consumed exactly once by a flush queue
pub struct TaskInjection {
    injected: oneshot::Sender<()>,
    inject_over: oneshot::Receiver<bool>,
    post_injection: PostInjectionFn,
    pack: Option<SegmentFlushPack>,
}

/// Caller side of the readiness/proceed handshake
pub struct InjectionHandle {
    injected: oneshot::Receiver<()>,
    inject_over: oneshot::Sender<bool>,
}

/// What the queue applies once the caller accepted the injection
pub(crate) struct AcceptedInjection {
    pub(crate) post_injection: PostInjectionFn,
    pub(crate) pack: Option<SegmentFlushPack>,
}

impl TaskInjection {
    pub fn new<F>(post_injection: F) -> (Self, InjectionHandle)
    where
        F: Fn(&mut SegmentFlushPack) + Send + Sync + 'static,
    {
        let (injected_tx, injected_rx) = oneshot::channel();
        let (over_tx, over_rx) = oneshot::channel();
        let injection = Self {
            injected: injected_tx,
            inject_over: over_rx,
            post_injection: Arc::new(post_injection),
            pack: None,
        };
        let handle = InjectionHandle {
            injected: injected_rx,
            inject_over: over_tx,
        };
        (injection, handle)
    }

    /// Injection that leaves packs untouched
    pub fn identity() -> (Self, InjectionHandle) {
        Self::new(|_| {})
    }

    /// Splice `pack` into the stream right when the barrier resolves
    pub fn with_pack(mut self, pack: SegmentFlushPack) -> Self {
        self.pack = Some(pack);
        self
    }

    /// Queue side: signal readiness, then wait for the caller's verdict.
    ///
    /// Returns `None` when the caller declined or went away.
    pub(crate) async fn rendezvous(self) -> Option<AcceptedInjection> {
        if self.injected.send(()).is_err() {
            return None;
        }
        match self.inject_over.await {
            Ok(true) => Some(AcceptedInjection {
                post_injection: self.post_injection,
                pack: self.pack,
            }),
            _ => None,
        }
    }
}

impl InjectionHandle {
    /// Wait until every pack queued before the barrier has been delivered
    pub async fn injected(&mut self) -> FlushResult<()> {
        (&mut self.injected).await.map_err(|_| {
            FlushError::InjectionAborted("flush queue dropped the injection before reaching it".to_string())
        })
    }

    /// Release the barrier; `false` discards the injection
    pub fn proceed(self, ok: bool) {
        // The queue only goes away when halted; nothing to resume then.
        let _ = self.inject_over.send(ok);
    }

    /// Wait for readiness and accept the injection
    pub async fn resolve(mut self) -> FlushResult<()> {
        self.injected().await?;
        self.proceed(true);
        Ok(())
    }
}
