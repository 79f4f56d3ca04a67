use super::{RequestStore, StoreError};
use crate::{k8s::CertificateRequest, ResourceId};
use parking_lot::Mutex;
use std::collections::HashMap;

/// An in-process store with the API server's optimistic concurrency
/// semantics: every write bumps the object's `resourceVersion`, and status
/// updates are rejected when they were based on a stale version.
#[derive(Debug, Default)]
pub struct MemoryStore(Mutex<State>);

#[derive(Debug, Default)]
struct State {
    objects: HashMap<ResourceId, CertificateRequest>,
    version: u64,
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new request, replacing any existing request with the same
    /// namespace and name.
    pub fn create(&self, mut req: CertificateRequest) -> Result<CertificateRequest, StoreError> {
        let id = ResourceId::of(&req)
            .ok_or_else(|| anyhow::anyhow!("CertificateRequest must have a namespace and name"))?;
        let mut state = self.0.lock();
        req.metadata.resource_version = Some(state.next_version());
        state.objects.insert(id, req.clone());
        Ok(req)
    }

    /// Modifies a stored request as another writer would. Returns the updated
    /// request, or `None` if it does not exist.
    pub fn modify(
        &self,
        id: &ResourceId,
        f: impl FnOnce(&mut CertificateRequest),
    ) -> Option<CertificateRequest> {
        let mut state = self.0.lock();
        let version = state.next_version();
        let req = state.objects.get_mut(id)?;
        f(req);
        req.metadata.resource_version = Some(version);
        Some(req.clone())
    }

    pub fn delete(&self, id: &ResourceId) -> Option<CertificateRequest> {
        self.0.lock().objects.remove(id)
    }

    pub fn snapshot(&self, id: &ResourceId) -> Option<CertificateRequest> {
        self.0.lock().objects.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl RequestStore for MemoryStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn update_status(
        &self,
        req: &CertificateRequest,
    ) -> Result<CertificateRequest, StoreError> {
        let id = ResourceId::of(req).ok_or(StoreError::NotFound)?;
        let mut state = self.0.lock();
        let version = state.next_version();
        let stored = state.objects.get_mut(&id).ok_or(StoreError::NotFound)?;
        if stored.metadata.resource_version != req.metadata.resource_version {
            return Err(StoreError::Conflict);
        }
        stored.status = req.status.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}
