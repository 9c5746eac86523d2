#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kaudit_core::{EnqueueReason, EventType, ResourceKey, ResourceKind};
use kaudit_queue::ReconcileQueue;
use rustc_hash::FxHashSet;

fn key(i: usize) -> ResourceKey { ResourceKey::new(ResourceKind::Secret, "team-a", format!("s-{i}")) }

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_key_is_never_processed_concurrently() {
    let queue = Arc::new(ReconcileQueue::new());
    let active: Arc<Mutex<FxHashSet<ResourceKey>>> = Arc::default();
    let overlaps = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let (queue, active, overlaps, processed) =
                (Arc::clone(&queue), Arc::clone(&active), Arc::clone(&overlaps), Arc::clone(&processed));
            tokio::spawn(async move {
                while let Some(entry) = queue.dequeue().await {
                    if !active.lock().unwrap().insert(entry.key.clone()) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.lock().unwrap().remove(&entry.key);
                    processed.fetch_add(1, Ordering::SeqCst);
                    queue.done(&entry.key);
                }
            })
        })
        .collect();

    for round in 0..50 {
        for i in 0..5 {
            queue.enqueue(key(i), EnqueueReason::Event(EventType::Modified));
        }
        if round % 10 == 0 {
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(queue.is_empty() && queue.in_flight() == 0) {
        assert!(tokio::time::Instant::now() < deadline, "queue did not drain");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.shutdown();
    for c in consumers {
        c.await.expect("consumer join");
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let n = processed.load(Ordering::SeqCst);
    assert!(n >= 5, "every key processed at least once, got {n}");
    assert!(n < 250, "bursts must coalesce, got {n}");
}
