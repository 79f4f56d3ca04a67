#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod certificate_request;
mod decision;

pub use self::{
    certificate_request::{
        CertificateRequest, CertificateRequestCondition, CertificateRequestSpec,
        CertificateRequestStatus, ObjectReference,
    },
    decision::Decision,
};
pub use k8s_openapi::ByteString;
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};
