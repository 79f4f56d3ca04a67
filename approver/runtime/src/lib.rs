#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use spiffe_approver_core as core;
pub use spiffe_approver_k8s_api as k8s;

mod args;
mod controller;
mod index;
mod lease;
mod metrics;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    controller::Controller,
    index::{Index, SharedIndex},
    metrics::{ControllerMetrics, IndexMetrics},
    store::KubeStore,
};
