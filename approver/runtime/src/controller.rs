use crate::{
    core::{Error, Evaluate, Outcome, Reconciler, RequestStore, ResourceId},
    index::SharedIndex,
    metrics::ControllerMetrics,
};
use ahash::AHashMap as HashMap;
use futures::prelude::*;
use std::{panic::AssertUnwindSafe, sync::Arc, thread};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
    time,
};
use tracing::{info_span, Instrument};

const REQUEUE_BASE_DELAY: time::Duration = time::Duration::from_millis(500);
const REQUEUE_MAX_DELAY: time::Duration = time::Duration::from_secs(5 * 60);

type Pass = (ResourceId, thread::Result<Result<Outcome, Error>>);

/// Drives reconciliation passes for the keys handed out by the index.
///
/// Passes only run while this replica holds the lease. At most one pass per
/// key is in flight; keys that are notified while a pass is running are run
/// again once it completes. Failed passes are retried with exponential
/// backoff.
pub struct Controller<E, S> {
    reconciler: Arc<Reconciler<E, S>>,
    index: SharedIndex,
    leader: watch::Receiver<bool>,
    queue: mpsc::Receiver<ResourceId>,
    resync_period: time::Duration,
    metrics: ControllerMetrics,

    /// Keys with a running pass, and whether they were notified since it
    /// started.
    in_flight: HashMap<ResourceId, bool>,
    /// Consecutive failures per key. Keys in this map are waiting on a
    /// requeue timer.
    failures: HashMap<ResourceId, u32>,
    tasks: JoinSet<Pass>,
    requeues: JoinSet<ResourceId>,
}

// === impl Controller ===

impl<E, S> Controller<E, S>
where
    E: Evaluate + 'static,
    S: RequestStore + 'static,
{
    pub fn new(
        reconciler: Arc<Reconciler<E, S>>,
        index: SharedIndex,
        leader: watch::Receiver<bool>,
        queue: mpsc::Receiver<ResourceId>,
        resync_period: time::Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            reconciler,
            index,
            leader,
            queue,
            resync_period,
            metrics,
            in_flight: HashMap::default(),
            failures: HashMap::default(),
            tasks: JoinSet::new(),
            requeues: JoinSet::new(),
        }
    }

    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut resync = time::interval(self.resync_period);
        resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!("Shutdown");
                    break;
                }

                res = self.leader.changed() => {
                    if res.is_err() {
                        tracing::error!("Leadership watch closed");
                        break;
                    }
                    let leader = *self.leader.borrow_and_update();
                    if leader {
                        tracing::info!("Became leader");
                        self.resync();
                    } else {
                        tracing::info!("No longer leader");
                        self.stop_all();
                    }
                }

                Some(res) = self.tasks.join_next() => {
                    // Cancelled passes were discarded along with their keys.
                    if let Ok((id, result)) = res {
                        self.complete(id, result);
                    }
                }

                Some(res) = self.requeues.join_next() => {
                    if let Ok(id) = res {
                        self.dispatch(id);
                    }
                }

                id = self.queue.recv() => match id {
                    Some(id) => self.notify(id),
                    None => {
                        tracing::error!("Controller queue closed");
                        break;
                    }
                },

                _ = resync.tick() => self.resync(),
            }
        }
    }

    fn dispatch(&mut self, id: ResourceId) {
        if !*self.leader.borrow() {
            tracing::trace!(%id, "Not the leader");
            return;
        }

        if let Some(dirty) = self.in_flight.get_mut(&id) {
            *dirty = true;
            return;
        }
        self.in_flight.insert(id.clone(), false);

        let reconciler = self.reconciler.clone();
        let span = info_span!("reconcile", namespace = %id.namespace, name = %id.name);
        self.tasks.spawn(
            async move {
                let result = AssertUnwindSafe(reconciler.reconcile(&id))
                    .catch_unwind()
                    .await;
                (id, result)
            }
            .instrument(span),
        );
    }

    fn complete(&mut self, id: ResourceId, result: thread::Result<Result<Outcome, Error>>) {
        let dirty = self.in_flight.remove(&id).unwrap_or(false);
        match result {
            Ok(Ok(outcome)) => {
                self.failures.remove(&id);
                self.metrics.record(&outcome);
                match outcome {
                    Outcome::Decided(decision) => {
                        tracing::info!(%id, %decision, "Recorded decision")
                    }
                    Outcome::NotAdmitted => tracing::trace!(%id, "Not admitted"),
                    outcome => tracing::debug!(%id, ?outcome, "Nothing to record"),
                }
                if dirty {
                    self.dispatch(id);
                }
            }
            Ok(Err(error)) => {
                self.metrics.errors.inc();
                tracing::warn!(%id, %error, "Reconciliation failed");
                self.requeue(id);
            }
            Err(_) => {
                self.metrics.errors.inc();
                tracing::warn!(%id, "Reconciliation panicked");
                self.requeue(id);
            }
        }
    }

    fn requeue(&mut self, id: ResourceId) {
        let failures = self.failures.entry(id.clone()).or_default();
        *failures = failures.saturating_add(1);
        let delay = backoff(*failures);

        self.metrics.requeues.inc();
        tracing::debug!(%id, ?delay, "Requeueing");
        self.requeues.spawn(async move {
            time::sleep(delay).await;
            id
        });
    }

    fn resync(&mut self) {
        if !*self.leader.borrow() {
            return;
        }

        let pending = self.index.read().pending();
        tracing::debug!(pending = pending.len(), "Resyncing");
        for id in pending {
            self.notify(id);
        }
    }

    /// Dispatches a key unless it is waiting to be retried.
    fn notify(&mut self, id: ResourceId) {
        // Failed keys are retried when their requeue timer fires.
        if self.failures.contains_key(&id) {
            tracing::trace!(%id, "Awaiting requeue");
            return;
        }
        self.dispatch(id);
    }

    fn stop_all(&mut self) {
        // Dropping a JoinSet aborts its tasks.
        self.tasks = JoinSet::new();
        self.requeues = JoinSet::new();
        self.in_flight.clear();
        self.failures.clear();
    }
}

fn backoff(failures: u32) -> time::Duration {
    let exp = failures.saturating_sub(1).min(16);
    REQUEUE_BASE_DELAY
        .saturating_mul(1 << exp)
        .min(REQUEUE_MAX_DELAY)
}
