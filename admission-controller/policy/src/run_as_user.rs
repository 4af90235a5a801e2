use admission_controller_core::{Applicability, Denial, Operation, Policy, Request};
use admission_controller_k8s_index::MetadataCache;
use anyhow::{bail, Error, Result};
use std::fmt;
use tracing::debug;

/// The namespace annotation that holds the UID pods in that namespace must run as.
pub const RUN_AS_USER_ANNOTATION: &str = "RunAsUser";

/// Forces pods to run as the UID configured on their namespace.
///
/// The namespace is looked up in a `MetadataCache` that is kept current by a watch. A namespace
/// that was created (or annotated) moments before the pod may not be visible yet, in which case
/// the pod is denied and the client is expected to retry.
#[derive(Clone, Debug)]
pub struct UidEnforcer {
    applicability: Applicability,
    namespaces: MetadataCache,
    mode: RunAsUserMode,
}

/// Controls how a pod's existing `runAsUser` settings are treated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RunAsUserMode {
    /// Replace any existing values with the namespace's UID.
    #[default]
    Overwrite,

    /// Deny pods whose containers already carry a security context.
    Strict,
}

impl UidEnforcer {
    pub const NAME: &'static str = "UidEnforcer";

    pub fn new(namespaces: MetadataCache, mode: RunAsUserMode) -> Self {
        Self {
            applicability: Applicability::pods([Operation::Create, Operation::Update]),
            namespaces,
            mode,
        }
    }

    fn namespace_uid(&self, namespace: &str) -> Result<i64, Denial> {
        let ns = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| Denial::policy(format!("namespace {namespace} not found")))?;

        let value = ns.annotation(RUN_AS_USER_ANNOTATION).ok_or_else(|| {
            Denial::policy(format!(
                "namespace {namespace} does not have a {RUN_AS_USER_ANNOTATION} annotation"
            ))
        })?;

        // UIDs are 32-bit even though the API represents them as 64-bit integers.
        let uid = value.parse::<i32>().map_err(|error| {
            Denial::policy(format!(
                "namespace {namespace} has an invalid {RUN_AS_USER_ANNOTATION} annotation {value:?}: {error}"
            ))
        })?;
        Ok(uid.into())
    }
}

impl Policy for UidEnforcer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applicability(&self) -> &Applicability {
        &self.applicability
    }

    fn admit(&self, req: &mut Request) -> Result<(), Denial> {
        let namespace = req.namespace.clone();
        let pod = req.pod_mut()?;
        let uid = self.namespace_uid(&namespace)?;
        let spec = pod.spec.get_or_insert_with(Default::default);

        if self.mode == RunAsUserMode::Strict {
            if let Some(container) = spec
                .containers
                .iter()
                .find(|c| c.security_context.is_some())
            {
                return Err(Denial::policy(format!(
                    "container {} must not set a securityContext; namespace {namespace} requires runAsUser {uid}",
                    container.name
                )));
            }
        }

        let pod_sc = spec.security_context.get_or_insert_with(Default::default);
        pod_sc.run_as_user = Some(uid);
        pod_sc.fs_group = Some(uid);
        for container in &mut spec.containers {
            container
                .security_context
                .get_or_insert_with(Default::default)
                .run_as_user = Some(uid);
        }
        debug!(%namespace, uid, containers = spec.containers.len(), "Set runAsUser");
        Ok(())
    }
}

// === impl RunAsUserMode ===

impl std::str::FromStr for RunAsUserMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "strict" => Ok(Self::Strict),
            s => bail!("invalid runAsUser mode: {s:?}"),
        }
    }
}

impl fmt::Display for RunAsUserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => "overwrite".fmt(f),
            Self::Strict => "strict".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_controller_core::{Container, Object, Pod, PodSpec, ResourceKind, SecurityContext};
    use admission_controller_k8s_index::{pair, CacheWriter, NamespaceMetadata};
    use maplit::btreemap;

    fn cache() -> (CacheWriter, MetadataCache) {
        let (mut writer, cache) = pair();
        writer.apply(NamespaceMetadata {
            name: "team-a".to_string(),
            annotations: btreemap! { "RunAsUser".to_string() => "1234".to_string() },
        });
        writer.apply(NamespaceMetadata {
            name: "unannotated".to_string(),
            annotations: Default::default(),
        });
        writer.apply(NamespaceMetadata {
            name: "garbled".to_string(),
            annotations: btreemap! { "RunAsUser".to_string() => "99999999999".to_string() },
        });
        writer.apply(NamespaceMetadata {
            name: "padded".to_string(),
            annotations: btreemap! { "RunAsUser".to_string() => " 100 ".to_string() },
        });
        (writer, cache)
    }

    fn pod(run_as: &[Option<i64>]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: run_as
                    .iter()
                    .enumerate()
                    .map(|(i, uid)| Container {
                        name: format!("c-{i}"),
                        security_context: uid.map(|uid| SecurityContext {
                            run_as_user: Some(uid),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn run_as_users(pod: &Pod) -> Vec<Option<i64>> {
        pod.spec
            .iter()
            .flat_map(|s| &s.containers)
            .map(|c| c.security_context.as_ref().and_then(|sc| sc.run_as_user))
            .collect()
    }

    #[test]
    fn overwrites_pod_and_containers() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::Overwrite);
        let mut req = Request::pod("team-a", Operation::Create, pod(&[None, Some(0)]));
        assert_eq!(policy.admit(&mut req), Ok(()));

        let pod = req.into_pod().unwrap();
        let sc = pod.spec.as_ref().unwrap().security_context.as_ref().unwrap();
        assert_eq!(sc.run_as_user, Some(1234));
        assert_eq!(sc.fs_group, Some(1234));
        assert_eq!(run_as_users(&pod), vec![Some(1234), Some(1234)]);
    }

    #[test]
    fn strict_mode_denies_existing_security_contexts() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::Strict);

        let mut req = Request::pod("team-a", Operation::Create, pod(&[None, None]));
        assert_eq!(policy.admit(&mut req), Ok(()));
        assert_eq!(
            run_as_users(req.as_pod().unwrap()),
            vec![Some(1234), Some(1234)]
        );

        // Even a matching UID is rejected.
        let mut req = Request::pod("team-a", Operation::Update, pod(&[None, Some(1234)]));
        let denial = policy.admit(&mut req).unwrap_err();
        assert!(!denial.is_internal());
        assert!(denial.reason().contains("c-1"), "{denial}");
        // A denied pod is left as it was submitted.
        assert_eq!(run_as_users(req.as_pod().unwrap()), vec![None, Some(1234)]);
        assert!(req.as_pod().unwrap().spec.as_ref().unwrap().security_context.is_none());
    }

    #[test]
    fn strict_mode_denies_security_contexts_without_uid() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::Strict);
        let mut pod = pod(&[None]);
        pod.spec.as_mut().unwrap().containers[0].security_context = Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        });

        let mut req = Request::pod("team-a", Operation::Create, pod);
        let denial = policy.admit(&mut req).unwrap_err();
        assert!(denial.reason().contains("c-0"), "{denial}");
        let sc = req.as_pod().unwrap().spec.as_ref().unwrap().containers[0]
            .security_context
            .clone()
            .unwrap();
        assert_eq!(sc.privileged, Some(true));
        assert_eq!(sc.run_as_user, None);
    }

    #[test]
    fn denies_unknown_namespace() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::default());
        let mut req = Request::pod("team-b", Operation::Create, pod(&[None]));
        let denial = policy.admit(&mut req).unwrap_err();
        assert!(!denial.is_internal());
        assert_eq!(denial.reason(), "namespace team-b not found");
    }

    #[test]
    fn denies_missing_or_invalid_annotation() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::default());
        for ns in ["unannotated", "garbled", "padded"] {
            let mut req = Request::pod(ns, Operation::Create, pod(&[None]));
            let denial = policy.admit(&mut req).unwrap_err();
            assert!(!denial.is_internal(), "{denial}");
            assert!(denial.reason().contains(ns), "{denial}");
            assert_eq!(run_as_users(req.as_pod().unwrap()), vec![None]);
        }
    }

    #[test]
    fn observes_namespace_updates() {
        let (mut writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::default());

        let mut req = Request::pod("team-c", Operation::Create, pod(&[None]));
        assert!(policy.admit(&mut req).is_err());

        writer.apply(NamespaceMetadata {
            name: "team-c".to_string(),
            annotations: btreemap! { "RunAsUser".to_string() => "42".to_string() },
        });
        let mut req = Request::pod("team-c", Operation::Create, pod(&[None]));
        assert_eq!(policy.admit(&mut req), Ok(()));
        assert_eq!(run_as_users(req.as_pod().unwrap()), vec![Some(42)]);

        writer.delete("team-c");
        let mut req = Request::pod("team-c", Operation::Create, pod(&[None]));
        assert!(policy.admit(&mut req).is_err());
    }

    #[test]
    fn unparseable_pod_is_an_internal_error() {
        let (_writer, cache) = cache();
        let policy = UidEnforcer::new(cache, RunAsUserMode::default());
        let mut req = Request {
            kind: ResourceKind::Pod,
            namespace: "team-a".to_string(),
            operation: Operation::Create,
            object: Object::Raw(Default::default()),
            user: None,
        };
        assert!(policy.admit(&mut req).unwrap_err().is_internal());
    }

    #[test]
    fn parses_modes() {
        assert_eq!("strict".parse::<RunAsUserMode>().unwrap(), RunAsUserMode::Strict);
        assert_eq!(
            "overwrite".parse::<RunAsUserMode>().unwrap(),
            RunAsUserMode::Overwrite
        );
        assert!("lenient".parse::<RunAsUserMode>().is_err());
    }
}
