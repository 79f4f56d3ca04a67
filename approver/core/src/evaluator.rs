use crate::k8s::CertificateRequest;
use std::sync::Arc;

pub mod fake;

pub use self::fake::FakeEvaluator;

/// Decides whether a CertificateRequest may be signed.
///
/// An `Err` is a policy objection; its message is recorded as the reason the
/// request was denied. The controller calls `evaluate` at most once per
/// reconciliation pass and never retries it.
#[async_trait::async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(&self, req: &CertificateRequest) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<E: Evaluate + ?Sized> Evaluate for Arc<E> {
    async fn evaluate(&self, req: &CertificateRequest) -> anyhow::Result<()> {
        (**self).evaluate(req).await
    }
}

#[async_trait::async_trait]
impl<E: Evaluate + ?Sized> Evaluate for Box<E> {
    async fn evaluate(&self, req: &CertificateRequest) -> anyhow::Result<()> {
        (**self).evaluate(req).await
    }
}
