use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ByteString, Decision};

pub const CONDITION_APPROVED: &str = "Approved";
pub const CONDITION_DENIED: &str = "Denied";
pub const CONDITION_TRUE: &str = "True";

/// A request for a signed certificate from a cert-manager issuer.
///
/// The resource definition is owned by cert-manager, so no schema is
/// generated for it here.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "CertificateRequest",
    status = "CertificateRequestStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestSpec {
    /// The PEM encoded x509 certificate signing request.
    pub request: ByteString,

    pub issuer_ref: ObjectReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, rename = "isCA", skip_serializing_if = "Option::is_none")]
    pub is_ca: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<BTreeMap<String, Vec<String>>>,
}

/// References the issuer that should sign a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<CertificateRequestCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<ByteString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ByteString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequestCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// One of `True`, `False` or `Unknown`.
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// === impl CertificateRequest ===

impl CertificateRequest {
    pub fn conditions(&self) -> &[CertificateRequestCondition] {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or_default()
    }

    /// Returns true if the request carries a condition of the given type with
    /// a `True` status.
    pub fn has_condition(&self, type_: &str) -> bool {
        self.conditions()
            .iter()
            .any(|c| c.type_ == type_ && c.status == CONDITION_TRUE)
    }

    pub fn is_approved(&self) -> bool {
        self.has_condition(CONDITION_APPROVED)
    }

    pub fn is_denied(&self) -> bool {
        self.has_condition(CONDITION_DENIED)
    }

    /// The approval state as recorded in the request's conditions. A denial
    /// takes precedence over an approval.
    pub fn decision(&self) -> Decision {
        if self.is_denied() {
            Decision::Denied
        } else if self.is_approved() {
            Decision::Approved
        } else {
            Decision::Undecided
        }
    }
}
