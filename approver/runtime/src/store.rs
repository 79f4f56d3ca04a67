use crate::{
    core::{RequestStore, ResourceId, StoreError},
    k8s::{self, CertificateRequest},
};
use tokio::time;

/// Reads and writes CertificateRequests through the Kubernetes API.
///
/// Every call is bounded by `timeout`. Status writes are JSON merge patches
/// that carry the object's `resourceVersion`, so the API server rejects them
/// with a conflict if the object changed since it was read.
#[derive(Clone)]
pub struct KubeStore {
    client: k8s::Client,
    params: k8s::PatchParams,
    timeout: time::Duration,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: k8s::Client, field_manager: &str, timeout: time::Duration) -> Self {
        Self {
            client,
            params: k8s::PatchParams::apply(field_manager),
            timeout,
        }
    }

    fn api(&self, namespace: &str) -> k8s::Api<CertificateRequest> {
        k8s::Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl RequestStore for KubeStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>, StoreError> {
        let api = self.api(&id.namespace);
        time::timeout(self.timeout, api.get_opt(&id.name))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(store_error)
    }

    async fn update_status(
        &self,
        req: &CertificateRequest,
    ) -> Result<CertificateRequest, StoreError> {
        let id = ResourceId::of(req)
            .ok_or_else(|| anyhow::anyhow!("CertificateRequest must have a namespace and name"))?;
        let patch = k8s::Patch::Merge(status_patch(req));
        let api = self.api(&id.namespace);
        time::timeout(self.timeout, api.patch_status(&id.name, &self.params, &patch))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(store_error)
    }
}

/// Merge patches replace lists wholesale, so the patch carries every
/// condition on the request.
fn status_patch(req: &CertificateRequest) -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "resourceVersion": req.metadata.resource_version,
        },
        "status": {
            "conditions": req.conditions(),
        },
    })
}

fn store_error(error: k8s::Error) -> StoreError {
    match error {
        k8s::Error::Api(response) if response.code == 409 => StoreError::Conflict,
        k8s::Error::Api(response) if response.code == 404 => StoreError::NotFound,
        error => StoreError::Api(error.into()),
    }
}
