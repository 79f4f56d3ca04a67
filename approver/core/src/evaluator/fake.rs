use super::Evaluate;
use crate::k8s::CertificateRequest;
use parking_lot::RwLock;
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

type EvaluateFn = dyn Fn(&CertificateRequest) -> anyhow::Result<()> + Send + Sync;

/// An evaluator whose behavior can be swapped while it is in use.
///
/// Clones share the same behavior and call count. A new evaluator approves
/// every request.
#[derive(Clone)]
pub struct FakeEvaluator(Arc<Inner>);

struct Inner {
    evaluate: RwLock<Arc<EvaluateFn>>,
    calls: AtomicUsize,
}

// === impl FakeEvaluator ===

impl FakeEvaluator {
    pub fn new() -> Self {
        let approve: Arc<EvaluateFn> =
            Arc::new(|_: &CertificateRequest| -> anyhow::Result<()> { Ok(()) });
        Self(Arc::new(Inner {
            evaluate: RwLock::new(approve),
            calls: AtomicUsize::new(0),
        }))
    }

    pub fn with_evaluate<F>(&self, evaluate: F) -> &Self
    where
        F: Fn(&CertificateRequest) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let evaluate: Arc<EvaluateFn> = Arc::new(evaluate);
        *self.0.evaluate.write() = evaluate;
        self
    }

    /// The number of times `evaluate` has been called.
    pub fn calls(&self) -> usize {
        self.0.calls.load(Ordering::Acquire)
    }
}

impl Default for FakeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeEvaluator")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Evaluate for FakeEvaluator {
    async fn evaluate(&self, req: &CertificateRequest) -> anyhow::Result<()> {
        self.0.calls.fetch_add(1, Ordering::AcqRel);
        let evaluate = self.0.evaluate.read().clone();
        evaluate(req)
    }
}
