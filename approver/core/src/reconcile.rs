use crate::{
    k8s::{CertificateRequest, Decision},
    writer, Evaluate, IssuerRef, RequestStore, ResourceId, StoreError, Verdict,
};
use futures::prelude::*;
use std::panic::AssertUnwindSafe;

const PANIC_DENIAL_REASON: &str = "policy evaluator panicked";

/// Infrastructure failures. These never reflect a policy outcome and should
/// be retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to fetch CertificateRequest {id}: {source}")]
    Fetch { id: ResourceId, source: StoreError },

    #[error("failed to record decision on CertificateRequest {id}: {source}")]
    Write { id: ResourceId, source: StoreError },

    #[error("CertificateRequest {id} was modified while being decided")]
    Conflict { id: ResourceId },
}

/// The result of a reconciliation pass that completed without error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The request no longer exists.
    NotFound,

    /// The request is addressed to another issuer.
    NotAdmitted,

    /// The request already carried a terminal decision. No evaluation was
    /// performed, or the decision was recorded by another writer first.
    AlreadyDecided(Decision),

    /// The decision was recorded by this pass.
    Decided(Decision),
}

/// What to do with the current state of a request.
#[derive(Debug)]
pub enum Plan {
    Skip(Outcome),
    Evaluate(Box<CertificateRequest>),
}

/// Decides, from the current state of a request alone, whether it needs to
/// be evaluated.
pub fn plan(issuer: &IssuerRef, req: Option<CertificateRequest>) -> Plan {
    let Some(req) = req else {
        return Plan::Skip(Outcome::NotFound);
    };
    if !issuer.admits(&req) {
        return Plan::Skip(Outcome::NotAdmitted);
    }
    let decision = req.decision();
    if decision.is_terminal() {
        return Plan::Skip(Outcome::AlreadyDecided(decision));
    }
    Plan::Evaluate(Box::new(req))
}

/// Approves or denies the CertificateRequests addressed to one issuer.
#[derive(Debug)]
pub struct Reconciler<E, S> {
    issuer: IssuerRef,
    approver: String,
    evaluator: E,
    store: S,
}

// === impl Reconciler ===

impl<E, S> Reconciler<E, S>
where
    E: Evaluate,
    S: RequestStore,
{
    /// `approver` identifies this controller in the conditions it writes.
    pub fn new(issuer: IssuerRef, approver: impl ToString, evaluator: E, store: S) -> Self {
        Self {
            issuer,
            approver: approver.to_string(),
            evaluator,
            store,
        }
    }

    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    pub async fn reconcile(&self, id: &ResourceId) -> Result<Outcome, Error> {
        let req = self.store.get(id).await.map_err(|source| Error::Fetch {
            id: id.clone(),
            source,
        })?;

        let req = match plan(&self.issuer, req) {
            Plan::Skip(outcome) => return Ok(outcome),
            Plan::Evaluate(req) => *req,
        };

        // A panicking evaluator is a policy failure like any other.
        let verdict = match AssertUnwindSafe(self.evaluator.evaluate(&req))
            .catch_unwind()
            .await
        {
            Ok(result) => Verdict::from_evaluation(result),
            Err(_) => {
                tracing::warn!("Policy evaluator panicked");
                Verdict::Deny {
                    reason: PANIC_DENIAL_REASON.to_string(),
                }
            }
        };
        if let Verdict::Deny { reason } = &verdict {
            tracing::debug!(%reason, "Request rejected by policy");
        }

        writer::commit(&self.store, id, req, &verdict, &self.approver).await
    }
}
