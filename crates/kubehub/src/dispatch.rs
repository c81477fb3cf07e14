use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vsync_core::{Domain, Identity, TrackedKind};
use vsync_store::Coalescer;
use vsync_sync::{Dispatcher, Event, Outcome, SkipReason};

/// Retries per event before it is dropped until the next notification.
pub const MAX_ATTEMPTS: u32 = 10;

type Key = (Domain, TrackedKind, Identity);

struct Queued {
    event: Event,
    attempt: u32,
}

pub struct DispatchHandle {
    pub tx: mpsc::Sender<Event>,
    pub task: JoinHandle<()>,
}

fn should_retry(result: &vsync_core::Result<Outcome>) -> bool {
    match result {
        Ok(Outcome::Skipped(SkipReason::Unresolved | SkipReason::ParentMissing)) => true,
        Ok(_) => false,
        Err(_) => true,
    }
}

async fn run_batch(
    dispatcher: &Dispatcher,
    batch: Vec<Queued>,
    retry_tx: &mpsc::UnboundedSender<Queued>,
    requeue_after: Duration,
) -> Vec<Event> {
    let mut follow = Vec::new();
    if batch.is_empty() {
        return follow;
    }
    let started = Instant::now();
    // one event per key, so handlers never race on the same object
    let results = futures::future::join_all(batch.iter().map(|q| dispatcher.handle(&q.event))).await;
    histogram!("vsync_dispatch_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

    for (q, result) in batch.into_iter().zip(results) {
        let (domain, kind, id) = q.event.key();
        match &result {
            Ok(outcome) => debug!(%domain, %kind, identity = %id, %outcome, "handled"),
            Err(e) if e.is_deferrable() => debug!(%domain, %kind, identity = %id, error = %e, "deferred"),
            Err(e) => warn!(%domain, %kind, identity = %id, error = %e, attempt = q.attempt, "sync failed"),
        }
        match dispatcher.dependents(&q.event).await {
            Ok(events) => follow.extend(events),
            Err(e) => debug!(%domain, %kind, identity = %id, error = %e, "dependent lookup failed"),
        }
        if !should_retry(&result) {
            continue;
        }
        if q.attempt + 1 >= MAX_ATTEMPTS {
            counter!("vsync_dispatch_gave_up_total", 1u64, "kind" => kind.as_str());
            warn!(%domain, %kind, identity = %id, "giving up until the next notification");
            continue;
        }
        let retry_tx = retry_tx.clone();
        let next = Queued { event: q.event, attempt: q.attempt + 1 };
        tokio::spawn(async move {
            tokio::time::sleep(requeue_after).await;
            let _ = retry_tx.send(next);
        });
    }
    follow
}

/// Spawn the coalescing dispatch loop.
///
/// Events are coalesced per object, drained every 8ms and handled
/// concurrently. Failed or deferred events are requeued after
/// `requeue_after` unless a newer event for the same object is pending.
/// Events a handled event depends on are queued with a fresh retry budget.
/// Dropping every sender stops the loop after a final drain.
pub fn spawn_dispatch(dispatcher: Arc<Dispatcher>, cap: usize, requeue_after: Duration) -> DispatchHandle {
    let (tx, mut rx) = mpsc::channel::<Event>(cap);
    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<Queued>();

    let task = tokio::spawn(async move {
        let mut queue: Coalescer<Key, Queued> = Coalescer::with_capacity(cap);
        let mut ticker = tokio::time::interval(Duration::from_millis(8));
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(event) => queue.push(event.key(), Queued { event, attempt: 0 }),
                        None => {
                            debug!("event channel closed; draining and exiting dispatch loop");
                            run_batch(&dispatcher, queue.drain_ready(), &retry_tx, requeue_after).await;
                            break;
                        }
                    }
                }
                Some(retry) = retry_rx.recv() => {
                    queue.push_if_absent(retry.event.key(), retry);
                }
                _ = ticker.tick() => {
                    let follow = run_batch(&dispatcher, queue.drain_ready(), &retry_tx, requeue_after).await;
                    for event in follow {
                        queue.push_if_absent(event.key(), Queued { event, attempt: 0 });
                    }
                }
            }
        }
        info!("dispatch loop stopped");
    });

    DispatchHandle { tx, task }
}
