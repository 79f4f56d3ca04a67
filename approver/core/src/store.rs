use crate::{k8s::CertificateRequest, ResourceId};
use std::sync::Arc;

mod memory;

pub use self::memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write was rejected because the object changed since it was read.
    #[error("the object has been modified since it was read")]
    Conflict,

    #[error("the object does not exist")]
    NotFound,

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Api(#[from] anyhow::Error),
}

/// Read and write access to CertificateRequests.
#[async_trait::async_trait]
pub trait RequestStore: Send + Sync {
    /// Fetches the current state of a request. Returns `None` if it no longer
    /// exists.
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>, StoreError>;

    /// Replaces the request's status.
    ///
    /// The write must only succeed if the stored object still has the
    /// `resourceVersion` of `req`; otherwise [`StoreError::Conflict`] is
    /// returned.
    async fn update_status(
        &self,
        req: &CertificateRequest,
    ) -> Result<CertificateRequest, StoreError>;
}

#[async_trait::async_trait]
impl<S: RequestStore + ?Sized> RequestStore for Arc<S> {
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>, StoreError> {
        (**self).get(id).await
    }

    async fn update_status(
        &self,
        req: &CertificateRequest,
    ) -> Result<CertificateRequest, StoreError> {
        (**self).update_status(req).await
    }
}
