use crate::{core::Outcome, k8s::Decision};
use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    pub(crate) approved: Counter,
    pub(crate) denied: Counter,
    pub(crate) skipped: Counter,
    pub(crate) errors: Counter,
    pub(crate) requeues: Counter,
}

#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    pub(crate) pending: Gauge,
    pub(crate) dropped: Counter,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "approved",
            "Count of CertificateRequests approved",
            metrics.approved.clone(),
        );
        prom.register(
            "denied",
            "Count of CertificateRequests denied",
            metrics.denied.clone(),
        );
        prom.register(
            "skipped",
            "Count of reconciliations that did not need to record a decision",
            metrics.skipped.clone(),
        );
        prom.register(
            "errors",
            "Count of reconciliations that failed and will be retried",
            metrics.errors.clone(),
        );
        prom.register(
            "requeues",
            "Count of CertificateRequests requeued after a failure",
            metrics.requeues.clone(),
        );
        metrics
    }

    /// Requests for other issuers are not counted.
    pub(crate) fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::NotAdmitted => return,
            Outcome::Decided(Decision::Approved) => self.approved.inc(),
            Outcome::Decided(Decision::Denied) => self.denied.inc(),
            Outcome::NotFound | Outcome::AlreadyDecided(_) | Outcome::Decided(_) => {
                self.skipped.inc()
            }
        };
    }
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "pending",
            "Number of CertificateRequests awaiting a decision",
            metrics.pending.clone(),
        );
        prom.register(
            "dropped",
            "Count of CertificateRequest updates dropped because the queue was full",
            metrics.dropped.clone(),
        );
        metrics
    }
}
