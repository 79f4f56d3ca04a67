use crate::{
    k8s::{
        certificate_request::{CONDITION_APPROVED, CONDITION_DENIED, CONDITION_TRUE},
        CertificateRequest, CertificateRequestCondition, Decision,
    },
    Error, Outcome, RequestStore, ResourceId, StoreError,
};
use chrono::{DateTime, SecondsFormat, Utc};

const DEFAULT_DENIAL_REASON: &str = "request was rejected by the policy evaluator";

/// The decision to record for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Deny { reason: String },
}

// === impl Verdict ===

impl Verdict {
    /// Any evaluator error denies the request.
    pub fn from_evaluation(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Approve,
            Err(error) => {
                let reason = format!("{error:#}");
                let reason = if reason.trim().is_empty() {
                    DEFAULT_DENIAL_REASON.to_string()
                } else {
                    reason
                };
                Self::Deny { reason }
            }
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            Self::Approve => Decision::Approved,
            Self::Deny { .. } => Decision::Denied,
        }
    }

    fn condition(
        &self,
        approver: &str,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> CertificateRequestCondition {
        let (type_, message) = match self {
            Self::Approve => (CONDITION_APPROVED, format!("Approved by {approver}")),
            Self::Deny { reason } => (CONDITION_DENIED, reason.clone()),
        };
        CertificateRequestCondition {
            type_: type_.to_string(),
            status: CONDITION_TRUE.to_string(),
            reason: Some(approver.to_string()),
            message: Some(message),
            last_transition_time: Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            observed_generation: generation,
        }
    }
}

/// Sets the verdict's condition on the request, replacing any existing
/// condition of the same type.
pub(crate) fn set_condition(
    req: &mut CertificateRequest,
    verdict: &Verdict,
    approver: &str,
    now: DateTime<Utc>,
) {
    let condition = verdict.condition(approver, req.metadata.generation, now);
    let conditions = req
        .status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new);
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Records the verdict on a request that was read as undecided.
///
/// The write is guarded by the request's resourceVersion. If another writer
/// got there first and the request is now terminal, the write is abandoned
/// and the existing decision is reported. Any other conflict is returned as a
/// retryable error.
pub(crate) async fn commit<S>(
    store: &S,
    id: &ResourceId,
    mut req: CertificateRequest,
    verdict: &Verdict,
    approver: &str,
) -> Result<Outcome, Error>
where
    S: RequestStore + ?Sized,
{
    let current = req.decision();
    if current.is_terminal() {
        return Ok(Outcome::AlreadyDecided(current));
    }

    set_condition(&mut req, verdict, approver, Utc::now());
    match store.update_status(&req).await {
        Ok(_) => Ok(Outcome::Decided(verdict.decision())),
        Err(StoreError::NotFound) => Ok(Outcome::NotFound),
        Err(StoreError::Conflict) => {
            let latest = store.get(id).await.map_err(|source| Error::Fetch {
                id: id.clone(),
                source,
            })?;
            match latest.map(|req| req.decision()) {
                None => Ok(Outcome::NotFound),
                Some(decision) if decision.is_terminal() => {
                    tracing::debug!(%decision, "Request was decided concurrently");
                    Ok(Outcome::AlreadyDecided(decision))
                }
                Some(_) => Err(Error::Conflict { id: id.clone() }),
            }
        }
        Err(source) => Err(Error::Write {
            id: id.clone(),
            source,
        }),
    }
}
