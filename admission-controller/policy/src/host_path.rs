use admission_controller_core::{Applicability, Denial, Operation, Policy, Request};
use ahash::AHashSet as HashSet;
use tracing::trace;

/// Denies pods that mount host paths outside of an allowlist.
#[derive(Clone, Debug)]
pub struct HostPathEnforcer {
    applicability: Applicability,
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl HostPathEnforcer {
    pub const NAME: &'static str = "HostPathEnforcer";

    /// Builds an enforcer that permits host paths that are in `exact` or that begin with one of
    /// `prefixes`. Empty entries are ignored so that an empty prefix cannot permit every path.
    pub fn new(
        exact: impl IntoIterator<Item = String>,
        prefixes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            applicability: Applicability::pods([Operation::Create]),
            exact: exact.into_iter().filter(|p| !p.is_empty()).collect(),
            prefixes: prefixes.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    fn allows(&self, path: &str) -> bool {
        self.exact.contains(path) || self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Policy for HostPathEnforcer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applicability(&self) -> &Applicability {
        &self.applicability
    }

    fn admit(&self, req: &mut Request) -> Result<(), Denial> {
        let pod = req.pod_mut()?;
        let volumes = pod
            .spec
            .iter()
            .flat_map(|spec| spec.volumes.iter().flatten());
        for volume in volumes {
            if let Some(ref host_path) = volume.host_path {
                if !self.allows(&host_path.path) {
                    return Err(Denial::policy(format!(
                        "{} is not in allowed host paths nor allowed host path prefixes",
                        host_path.path
                    )));
                }
                trace!(volume = %volume.name, path = %host_path.path, "Allowed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_controller_core::{HostPathVolumeSource, Pod, PodSpec, Volume};
    use quickcheck::{quickcheck, Arbitrary, Gen};

    /// A few short paths built from a tiny alphabet, so that generated paths and allowlist entries
    /// often coincide or share prefixes.
    #[derive(Clone, Debug)]
    struct Paths(Vec<String>);

    impl Arbitrary for Paths {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = usize::arbitrary(g) % 4;
            let paths = (0..n)
                .map(|_| {
                    let len = usize::arbitrary(g) % 4;
                    (0..len)
                        .map(|_| *g.choose(&["/", "/tmp", "/var", "run", "a"]).unwrap())
                        .collect::<String>()
                })
                .collect();
            Paths(paths)
        }
    }

    fn host_path_pod(paths: &[&str]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                volumes: Some(
                    paths
                        .iter()
                        .enumerate()
                        .map(|(i, path)| Volume {
                            name: format!("vol-{i}"),
                            host_path: Some(HostPathVolumeSource {
                                path: path.to_string(),
                                type_: None,
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn enforcer(exact: &[&str], prefixes: &[&str]) -> HostPathEnforcer {
        HostPathEnforcer::new(
            exact.iter().map(ToString::to_string),
            prefixes.iter().map(ToString::to_string),
        )
    }

    #[test]
    fn allows_exact_and_prefixed_paths() {
        let policy = enforcer(&["/var/run/nscd"], &["/tmp"]);
        let mut req = Request::pod(
            "ns-0",
            Operation::Create,
            host_path_pod(&["/var/run/nscd", "/tmp/wat"]),
        );
        assert_eq!(policy.admit(&mut req), Ok(()));
    }

    #[test]
    fn denies_unlisted_path() {
        let policy = enforcer(&["/var/run/nscd"], &["/tmp"]);
        let mut req = Request::pod(
            "ns-0",
            Operation::Create,
            host_path_pod(&["/tmp/wat", "/var/lib/secret"]),
        );
        let denial = policy.admit(&mut req).unwrap_err();
        assert!(!denial.is_internal());
        assert_eq!(
            denial.reason(),
            "/var/lib/secret is not in allowed host paths nor allowed host path prefixes"
        );
    }

    #[test]
    fn exact_paths_do_not_match_children() {
        let policy = enforcer(&["/var/run/nscd"], &[]);
        let mut req = Request::pod(
            "ns-0",
            Operation::Create,
            host_path_pod(&["/var/run/nscd/socket"]),
        );
        assert!(policy.admit(&mut req).is_err());
    }

    #[test]
    fn empty_allowlist_denies_any_host_path() {
        let policy = enforcer(&[], &[""]);
        let mut req = Request::pod("ns-0", Operation::Create, host_path_pod(&["/tmp"]));
        assert!(policy.admit(&mut req).is_err());
    }

    #[test]
    fn ignores_other_volumes() {
        let policy = enforcer(&[], &[]);
        let mut pod = host_path_pod(&[]);
        pod.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "scratch".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        }]);
        let mut req = Request::pod("ns-0", Operation::Create, pod);
        assert_eq!(policy.admit(&mut req), Ok(()));
    }

    quickcheck! {
        fn admits_iff_every_path_is_allowed(paths: Paths, exact: Paths, prefixes: Paths) -> bool {
            let allowed = |path: &str| {
                exact.0.iter().any(|e| !e.is_empty() && e == path)
                    || prefixes.0.iter().any(|p| !p.is_empty() && path.starts_with(p.as_str()))
            };
            let expected = paths.0.iter().all(|p| allowed(p.as_str()));

            let policy = HostPathEnforcer::new(exact.0.clone(), prefixes.0.clone());
            let paths = paths.0.iter().map(String::as_str).collect::<Vec<_>>();
            let mut req = Request::pod("ns-0", Operation::Create, host_path_pod(&paths));
            policy.admit(&mut req).is_ok() == expected
        }
    }
}
