//! Admission policy chain.
//!
//! A `Request` describes a single proposed create/update of a cluster resource. A `PolicyChain`
//! evaluates the request against an ordered list of `Policy` values. Each policy may rewrite the
//! request's object in place or deny it. Evaluation stops at the first denial; mutations made by
//! earlier policies are not rolled back.
//!
//! ```text
//! [ Request ] -> [ Policy 0 ] -> [ Policy 1 ] -> ... -> Allowed
//!                      \               \
//!                       Denied          Denied
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod policy;
pub mod request;

pub use self::{
    chain::{Decision, PolicyChain},
    policy::{Applicability, Denial, Policy},
    request::{Object, Operation, Request, ResourceKind},
};
pub use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, Pod, PodSecurityContext, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
