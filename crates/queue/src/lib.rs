//! kaudit reconcile queue: keyed, deduplicating, at most one in-flight entry per key.
//!
//! A key enqueued while it is being processed is marked dirty and re-queued by
//! [`ReconcileQueue::done`], so N rapid events collapse into at most two
//! evaluations. The queue is unbounded: it backs up rather than drops.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kaudit_core::{EnqueueReason, QueueEntry, ResourceKey};
use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct Inner {
    /// Keys ready to be handed out, FIFO.
    order: VecDeque<ResourceKey>,
    /// Dirty keys (queued or waiting for their in-flight run to finish) and their latest reason.
    dirty: FxHashMap<ResourceKey, EnqueueReason>,
    processing: FxHashSet<ResourceKey>,
    shutting_down: bool,
}

/// Work queue shared by the event pump (producer) and the workers (consumers).
#[derive(Default)]
pub struct ReconcileQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ReconcileQueue {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a key. Never fails; ignored only after shutdown.
    pub fn enqueue(&self, key: ResourceKey, reason: EnqueueReason) {
        let mut g = self.lock();
        if g.shutting_down {
            debug!(key = %key, "queue shutting down; dropping enqueue");
            return;
        }
        if let Some(prev) = g.dirty.get_mut(&key) {
            *prev = reason;
            return;
        }
        g.dirty.insert(key.clone(), reason);
        if g.processing.contains(&key) {
            debug!(key = %key, "key in flight; marked dirty");
            return;
        }
        g.order.push_back(key);
        gauge!("queue_depth", g.order.len() as f64);
        drop(g);
        self.notify.notify_one();
    }

    /// Re-add `key` after `delay` from a background task.
    pub fn enqueue_after(self: &Arc<Self>, key: ResourceKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key, EnqueueReason::Retry);
        });
    }

    /// Wait for the next key not currently in flight. `None` once shut down.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut g = self.lock();
                if g.shutting_down {
                    return None;
                }
                if let Some(key) = g.order.pop_front() {
                    let reason = g.dirty.remove(&key).unwrap_or(EnqueueReason::Retry);
                    g.processing.insert(key.clone());
                    gauge!("queue_depth", g.order.len() as f64);
                    return Some(QueueEntry { key, reason });
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished; a key dirtied during processing goes straight back in.
    pub fn done(&self, key: &ResourceKey) {
        let mut g = self.lock();
        g.processing.remove(key);
        if g.shutting_down || !g.dirty.contains_key(key) {
            return;
        }
        g.order.push_back(key.clone());
        gauge!("queue_depth", g.order.len() as f64);
        drop(g);
        self.notify.notify_one();
    }

    /// Stop handing out work. Pending entries are dropped; in-flight ones may still call `done`.
    pub fn shutdown(&self) {
        let mut g = self.lock();
        g.shutting_down = true;
        let dropped = g.order.len();
        g.order.clear();
        g.dirty.clear();
        gauge!("queue_depth", 0.0);
        drop(g);
        debug!(dropped, "queue shut down");
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool { self.lock().shutting_down }

    /// Keys waiting to be dequeued.
    pub fn len(&self) -> usize { self.lock().order.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn in_flight(&self) -> usize { self.lock().processing.len() }
}
