use crate::k8s::{CertificateRequest, ObjectReference};
use std::fmt;

/// The issuer this controller decides requests for.
///
/// A request is only ever admitted when its `issuerRef` equals this reference
/// field for field. Unset fields on the request compare as empty strings; no
/// defaulting is applied, so a request that omits its kind is not admitted
/// by a controller configured for `Issuer`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
    pub group: String,
}

impl IssuerRef {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            group: group.into(),
        }
    }

    /// Returns true if the request is addressed to this issuer.
    pub fn admits(&self, req: &CertificateRequest) -> bool {
        self.matches(&req.spec.issuer_ref)
    }

    pub fn matches(&self, reference: &ObjectReference) -> bool {
        let ObjectReference { name, kind, group } = reference;
        *name == self.name
            && kind.as_deref().unwrap_or_default() == self.kind
            && group.as_deref().unwrap_or_default() == self.group
    }
}

impl From<IssuerRef> for ObjectReference {
    fn from(issuer: IssuerRef) -> Self {
        let IssuerRef { name, kind, group } = issuer;
        Self {
            name,
            kind: Some(kind),
            group: Some(group),
        }
    }
}

impl fmt::Display for IssuerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.kind, self.group, self.name)
    }
}
