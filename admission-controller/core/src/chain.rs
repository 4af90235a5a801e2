use crate::{
    policy::{Denial, Policy},
    request::Request,
};
use std::{fmt, sync::Arc};
use tracing::{debug, info, trace, warn};

/// An ordered, short-circuiting sequence of policies.
///
/// Order is significant: a policy observes the mutations made by every policy before it.
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn Policy>>,
}

/// The outcome of evaluating a request against a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Every applicable policy passed. The request's object carries all mutations.
    Allowed,

    /// A policy denied the request. Mutations made by earlier policies remain applied.
    Denied {
        policy: &'static str,
        denial: Denial,
    },
}

// === impl PolicyChain ===

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a policy to the end of the chain.
    pub fn push(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn push_shared(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.policies.iter().map(|p| p.name())
    }

    /// Evaluates `req` against each applicable policy in registration order.
    pub fn evaluate(&self, req: &mut Request) -> Decision {
        for policy in self.policies.iter() {
            let name = policy.name();
            if !policy.applicability().applies(req) {
                trace!(policy = %name, kind = %req.kind, op = %req.operation, "Not applicable");
                continue;
            }

            debug!(policy = %name, ns = %req.namespace, "Evaluating");
            if let Err(denial) = policy.admit(req) {
                match denial {
                    Denial::Policy(ref reason) => {
                        info!(policy = %name, ns = %req.namespace, %reason, "Denied")
                    }
                    Denial::Internal(ref error) => {
                        warn!(policy = %name, ns = %req.namespace, %error, "Failed")
                    }
                }
                return Decision::Denied {
                    policy: name,
                    denial,
                };
            }
        }

        Decision::Allowed
    }

    /// Evaluates `req`, returning the denial as an error.
    pub fn admit(&self, req: &mut Request) -> Result<(), Denial> {
        match self.evaluate(req) {
            Decision::Allowed => Ok(()),
            Decision::Denied { denial, .. } => Err(denial),
        }
    }
}

impl fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// === impl Decision ===

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
