//! Worker pool: N tasks looping dequeue → reconcile → done, plus the event pump.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use kaudit_core::{ChangeEvent, EnqueueReason};
use kaudit_queue::ReconcileQueue;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::reconciler::{Outcome, Reconciler};

pub struct WorkerPool {
    queue: Arc<ReconcileQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(queue: Arc<ReconcileQueue>, reconciler: Arc<Reconciler>, n: usize) -> Self {
        let workers = (0..n.max(1))
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&queue), Arc::clone(&reconciler))))
            .collect();
        info!(workers = n.max(1), "worker pool started");
        Self { queue, workers }
    }

    pub fn queue(&self) -> &Arc<ReconcileQueue> { &self.queue }

    /// Stop taking work, then wait up to `grace` for in-flight reconciles to finish.
    /// Returns true when every worker drained in time.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.queue.shutdown();
        let mut workers = self.workers;
        let drain = futures::future::join_all(workers.iter_mut());
        match tokio::time::timeout(grace, drain).await {
            Ok(_) => {
                info!("worker pool drained");
                true
            }
            Err(_) => {
                warn!(grace_ms = %grace.as_millis(), in_flight = self.queue.in_flight(), "grace period elapsed; aborting workers");
                for w in &workers { w.abort(); }
                false
            }
        }
    }
}

async fn worker_loop(id: usize, queue: Arc<ReconcileQueue>, reconciler: Arc<Reconciler>) {
    debug!(worker = id, "worker started");
    while let Some(entry) = queue.dequeue().await {
        let outcome = AssertUnwindSafe(reconciler.reconcile(&entry)).catch_unwind().await;
        match outcome {
            Ok(Outcome::Success) => {}
            Ok(Outcome::RequeueAfter(delay)) => queue.enqueue_after(entry.key.clone(), delay),
            Ok(Outcome::Fatal(e)) => error!(worker = id, key = %entry.key, error = %e, "giving up on key"),
            Err(_) => {
                counter!("reconcile_panics_total", 1);
                error!(worker = id, key = %entry.key, "reconcile panicked; key dropped until next event");
            }
        }
        queue.done(&entry.key);
    }
    debug!(worker = id, "worker stopped");
}

/// Forward change events into the queue until the channel closes.
pub async fn pump_events(mut rx: mpsc::Receiver<ChangeEvent>, queue: Arc<ReconcileQueue>) -> u64 {
    let mut forwarded = 0u64;
    while let Some(ev) = rx.recv().await {
        debug!(key = %ev.key, event = ?ev.event, "change event");
        queue.enqueue(ev.key, EnqueueReason::Event(ev.event));
        forwarded += 1;
    }
    debug!(forwarded, "event channel closed");
    forwarded
}
