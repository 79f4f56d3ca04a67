#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admission;
pub mod evaluator;
mod reconcile;
pub mod store;
mod writer;


pub use self::{
    admission::IssuerRef,
    evaluator::Evaluate,
    reconcile::{plan, Error, Outcome, Plan, Reconciler},
    store::{RequestStore, StoreError},
    writer::Verdict,
};
pub use spiffe_approver_k8s_api as k8s;

use k8s::{CertificateRequest, ResourceExt};
use std::fmt;

/// Uniquely identifies a CertificateRequest.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns `None` if the request has no namespace or name.
    pub fn of(req: &CertificateRequest) -> Option<Self> {
        let namespace = req.namespace()?;
        let name = req.metadata.name.clone()?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
