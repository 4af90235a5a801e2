#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use admission_controller_core as core;
pub use admission_controller_k8s_index as index;
pub use admission_controller_policy as policy;

mod admission;
mod args;
mod duration;

pub use self::{
    admission::{Admission, AdmissionMetrics},
    args::Args,
};
