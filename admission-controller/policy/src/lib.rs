//! Pod admission policies.
//!
//! Each policy is registered under a name so that the set of enabled policies, and the order in
//! which they run, can be chosen at startup.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod host_automount;
mod host_path;
mod registry;
mod run_as_user;


pub use self::{
    host_automount::HostAutomounter,
    host_path::HostPathEnforcer,
    registry::RegistryEnforcer,
    run_as_user::{RunAsUserMode, UidEnforcer, RUN_AS_USER_ANNOTATION},
};
use admission_controller_core::{Policy, PolicyChain};
use admission_controller_k8s_index::MetadataCache;
use anyhow::{anyhow, Error, Result};
use std::{fmt, sync::Arc};

/// Identifies a policy implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolicyName {
    HostAutomounter,
    HostPathEnforcer,
    RegistryEnforcer,
    UidEnforcer,
}

/// Settings shared by all policies.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Host paths that pods may mount.
    pub host_paths_allowed: Vec<String>,

    /// Host path prefixes under which pods may mount anything.
    pub host_path_prefixes_allowed: Vec<String>,

    /// Host paths mounted into every container.
    pub host_automounts: Vec<String>,

    /// The registry all images must be pulled from. Empty when unset.
    pub enforced_registry: String,

    pub run_as_user_mode: RunAsUserMode,
}

// === impl PolicyName ===

impl PolicyName {
    /// The policies run when none are configured explicitly.
    pub const DEFAULT_ORDER: [Self; 4] = [
        Self::HostAutomounter,
        Self::HostPathEnforcer,
        Self::RegistryEnforcer,
        Self::UidEnforcer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostAutomounter => HostAutomounter::NAME,
            Self::HostPathEnforcer => HostPathEnforcer::NAME,
            Self::RegistryEnforcer => RegistryEnforcer::NAME,
            Self::UidEnforcer => UidEnforcer::NAME,
        }
    }
}

impl std::str::FromStr for PolicyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::DEFAULT_ORDER
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| anyhow!("unknown policy: {s:?}"))
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl Config ===

impl Config {
    /// Instantiates a single policy.
    pub fn policy(&self, name: PolicyName, namespaces: &MetadataCache) -> Arc<dyn Policy> {
        match name {
            PolicyName::HostAutomounter => {
                Arc::new(HostAutomounter::new(self.host_automounts.iter().cloned()))
            }
            PolicyName::HostPathEnforcer => Arc::new(HostPathEnforcer::new(
                self.host_paths_allowed.iter().cloned(),
                self.host_path_prefixes_allowed.iter().cloned(),
            )),
            PolicyName::RegistryEnforcer => {
                Arc::new(RegistryEnforcer::new(self.enforced_registry.clone()))
            }
            PolicyName::UidEnforcer => {
                Arc::new(UidEnforcer::new(namespaces.clone(), self.run_as_user_mode))
            }
        }
    }

    /// Builds a chain that evaluates the named policies in the given order.
    pub fn build(&self, names: &[PolicyName], namespaces: &MetadataCache) -> PolicyChain {
        names.iter().fold(PolicyChain::new(), |chain, name| {
            chain.push_shared(self.policy(*name, namespaces))
        })
    }
}
