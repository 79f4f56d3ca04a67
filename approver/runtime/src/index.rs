use crate::{
    core::{IssuerRef, ResourceId},
    k8s::CertificateRequest,
    metrics::IndexMetrics,
};
use ahash::AHashSet as HashSet;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{error::TrySendError, Sender};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Tracks which CertificateRequests addressed to this controller's issuer
/// still need a decision, and queues them for reconciliation as watch events
/// arrive.
///
/// The index holds no object state; it only ever hands keys to the
/// controller, which reads the current object before acting. Duplicate and
/// out of order events are therefore harmless.
#[derive(Debug)]
pub struct Index {
    issuer: IssuerRef,
    pending: HashSet<ResourceId>,
    queue: Sender<ResourceId>,
    metrics: IndexMetrics,
}

impl Index {
    pub fn shared(
        issuer: IssuerRef,
        queue: Sender<ResourceId>,
        metrics: IndexMetrics,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            issuer,
            pending: HashSet::new(),
            queue,
            metrics,
        }))
    }

    /// The requests that were undecided when last observed.
    pub fn pending(&self) -> Vec<ResourceId> {
        self.pending.iter().cloned().collect()
    }

    fn remove(&mut self, id: &ResourceId) {
        if self.pending.remove(id) {
            self.metrics.pending.set(self.pending.len() as i64);
        }
    }

    fn enqueue(&self, id: ResourceId) {
        match self.queue.try_send(id) {
            Ok(()) => {}
            Err(TrySendError::Full(id)) => {
                // The request stays pending and is picked up by the next resync.
                self.metrics.dropped.inc();
                tracing::debug!(%id, "Queue full");
            }
            Err(TrySendError::Closed(id)) => {
                tracing::error!(%id, "Controller queue closed");
            }
        }
    }
}

impl kubert::index::IndexNamespacedResource<CertificateRequest> for Index {
    fn apply(&mut self, req: CertificateRequest) {
        if !self.issuer.admits(&req) {
            return;
        }
        let Some(id) = ResourceId::of(&req) else {
            return;
        };

        if req.decision().is_terminal() {
            self.remove(&id);
            return;
        }

        if self.pending.insert(id.clone()) {
            self.metrics.pending.set(self.pending.len() as i64);
        }
        self.enqueue(id);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(&ResourceId::new(namespace, name));
    }

    // Each apply only touches a single request, so resets need no special
    // handling.
}
