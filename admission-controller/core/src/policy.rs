use crate::request::{Operation, Request, ResourceKind};
use thiserror::Error;

/// A single admission rule.
///
/// Policies are evaluated synchronously. They must not block: any state they depend on (e.g.
/// cluster metadata) must already be held in memory.
pub trait Policy: Send + Sync {
    /// The name under which the policy is registered.
    fn name(&self) -> &'static str;

    /// Describes the requests the policy applies to.
    fn applicability(&self) -> &Applicability;

    /// Evaluates an applicable request, possibly mutating its object.
    ///
    /// Returning an error denies the request.
    fn admit(&self, req: &mut Request) -> Result<(), Denial>;
}

/// Selects the resource kinds and operations a policy handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applicability {
    operations: Vec<Operation>,

    /// When unset, the policy applies to every kind.
    kind: Option<ResourceKind>,
}

/// The reason a request was denied.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Denial {
    /// A well-formed request violates a rule.
    #[error("{0}")]
    Policy(String),

    /// The request could not be interpreted or the policy is misconfigured.
    #[error("{0}")]
    Internal(String),
}

// === impl Applicability ===

impl Applicability {
    pub fn new(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
            kind: None,
        }
    }

    /// Restricts the policy to a single resource kind.
    pub fn for_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn pods(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self::new(operations).for_kind(ResourceKind::Pod)
    }

    pub fn handles(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn applies(&self, req: &Request) -> bool {
        if !self.handles(req.operation) {
            return false;
        }
        match self.kind {
            Some(ref kind) => *kind == req.kind,
            None => true,
        }
    }
}

// === impl Denial ===

impl Denial {
    pub fn policy(reason: impl Into<String>) -> Self {
        Self::Policy(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Policy(reason) | Self::Internal(reason) => reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Object, Pod};

    fn req(kind: ResourceKind, operation: Operation) -> Request {
        Request {
            kind,
            namespace: "ns-0".to_string(),
            operation,
            object: Object::Pod(Box::new(Pod::default())),
            user: None,
        }
    }

    #[test]
    fn pod_create_only() {
        let a = Applicability::pods(Some(Operation::Create));
        assert!(a.applies(&req(ResourceKind::Pod, Operation::Create)));
        assert!(!a.applies(&req(ResourceKind::Pod, Operation::Update)));
        assert!(!a.applies(&req(
            ResourceKind::from_group_kind("", "Service"),
            Operation::Create
        )));
    }

    #[test]
    fn any_kind() {
        let a = Applicability::new([Operation::Create, Operation::Update]);
        assert!(a.applies(&req(ResourceKind::Pod, Operation::Update)));
        assert!(a.applies(&req(
            ResourceKind::from_group_kind("apps", "Deployment"),
            Operation::Create
        )));
    }
}
