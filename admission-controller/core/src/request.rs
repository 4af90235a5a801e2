use crate::{policy::Denial, Pod};
use std::fmt;

/// The operations that policies may be evaluated against.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
}

/// The kind of resource an admission request refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A core-group `Pod`.
    Pod,

    /// Any other resource, identified by its API group and kind.
    Other { group: String, kind: String },
}

/// The submitted object.
///
/// The declared `ResourceKind` and the payload are tracked separately so that a request claiming
/// to be a pod but carrying something else is surfaced as an error when a policy extracts it.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Pod(Box<Pod>),
    Raw(serde_json::Value),
}

/// A single admission request.
///
/// The object is owned by the request for the duration of a chain evaluation; policies borrow it
/// mutably and must not retain references once they return.
#[derive(Clone, Debug)]
pub struct Request {
    pub kind: ResourceKind,
    pub namespace: String,
    pub operation: Operation,
    pub object: Object,
    pub user: Option<String>,
}

// === impl Operation ===

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => "CREATE".fmt(f),
            Self::Update => "UPDATE".fmt(f),
        }
    }
}

// === impl ResourceKind ===

impl ResourceKind {
    /// Classifies an API group/kind pair.
    pub fn from_group_kind(group: &str, kind: &str) -> Self {
        if group.is_empty() && kind.eq_ignore_ascii_case("Pod") {
            return Self::Pod;
        }
        Self::Other {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => "Pod".fmt(f),
            Self::Other { group, kind } if group.is_empty() => kind.fmt(f),
            Self::Other { group, kind } => write!(f, "{kind}.{group}"),
        }
    }
}

// === impl Request ===

impl Request {
    pub fn pod(namespace: impl Into<String>, operation: Operation, pod: Pod) -> Self {
        Self {
            kind: ResourceKind::Pod,
            namespace: namespace.into(),
            operation,
            object: Object::Pod(Box::new(pod)),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Extracts the pod payload for mutation.
    ///
    /// Fails with an internal error when the request is not declared as a pod or when the
    /// payload could not be interpreted as one.
    pub fn pod_mut(&mut self) -> Result<&mut Pod, Denial> {
        if self.kind != ResourceKind::Pod {
            return Err(Denial::internal(format!(
                "expected a Pod but the request is for {}",
                self.kind
            )));
        }
        match self.object {
            Object::Pod(ref mut pod) => Ok(&mut **pod),
            Object::Raw(_) => Err(Denial::internal(
                "resource was marked with kind Pod but was unable to be converted",
            )),
        }
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self.object {
            Object::Pod(ref pod) if self.kind == ResourceKind::Pod => Some(&**pod),
            _ => None,
        }
    }

    pub fn into_pod(self) -> Option<Pod> {
        match self.object {
            Object::Pod(pod) if self.kind == ResourceKind::Pod => Some(*pod),
            _ => None,
        }
    }
}
