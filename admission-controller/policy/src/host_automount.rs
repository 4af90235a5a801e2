use admission_controller_core::{
    Applicability, Denial, HostPathVolumeSource, Operation, Policy, Request, Volume, VolumeMount,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

/// Mounts a fixed set of host paths, read-only, into every container of a pod.
///
/// A host-path volume that already exists for one of the paths is reused; otherwise a volume with
/// a generated name is added. Containers that already mount something at a path are left alone.
/// Applying the policy to its own output changes nothing.
#[derive(Clone, Debug)]
pub struct HostAutomounter {
    applicability: Applicability,
    paths: BTreeSet<String>,
}

/// Kubernetes volume names are DNS labels.
const MAX_NAME_LEN: usize = 63;

const SUFFIX_LEN: usize = 5;

const SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

impl HostAutomounter {
    pub const NAME: &'static str = "HostAutomounter";

    pub fn new(paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            applicability: Applicability::pods([Operation::Create]),
            paths: paths.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }
}

impl Policy for HostAutomounter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applicability(&self) -> &Applicability {
        &self.applicability
    }

    fn admit(&self, req: &mut Request) -> Result<(), Denial> {
        let pod = req.pod_mut()?;
        let Some(spec) = pod.spec.as_mut() else {
            return Ok(());
        };
        if self.paths.is_empty() {
            return Ok(());
        }

        // Every name already used by a volume or a mount must be avoided when generating one.
        let mut taken = spec
            .volumes
            .iter()
            .flatten()
            .map(|v| v.name.clone())
            .chain(
                spec.containers
                    .iter()
                    .flat_map(|c| c.volume_mounts.iter().flatten())
                    .map(|m| m.name.clone()),
            )
            .collect::<HashSet<_>>();

        let mut volume_names = HashMap::<&str, String>::new();
        for volume in spec.volumes.iter().flatten() {
            if let Some(ref hp) = volume.host_path {
                if let Some(path) = self.paths.get(&hp.path) {
                    volume_names
                        .entry(path.as_str())
                        .or_insert_with(|| volume.name.clone());
                }
            }
        }

        for path in &self.paths {
            if volume_names.contains_key(path.as_str()) {
                continue;
            }
            let name = volume_name(path, &taken);
            debug!(%path, volume = %name, "Adding host path volume");
            taken.insert(name.clone());
            spec.volumes.get_or_insert_with(Vec::new).push(Volume {
                name: name.clone(),
                host_path: Some(HostPathVolumeSource {
                    path: path.clone(),
                    type_: None,
                }),
                ..Default::default()
            });
            volume_names.insert(path.as_str(), name);
        }

        for container in &mut spec.containers {
            let mounted = container
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| m.mount_path.clone())
                .collect::<HashSet<_>>();
            for path in &self.paths {
                if mounted.contains(path) {
                    continue;
                }
                debug!(container = %container.name, %path, "Mounting host path");
                container
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .push(VolumeMount {
                        name: volume_names[path.as_str()].clone(),
                        mount_path: path.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    });
            }
        }

        Ok(())
    }
}

/// Derives a volume name from a host path, e.g. `/var/run/nscd` becomes `varrunnscd-x7k2q`.
///
/// The random suffix is regenerated until the name collides with nothing in `taken`.
fn volume_name(path: &str, taken: &HashSet<String>) -> String {
    let stem = path
        .chars()
        .filter(|c| *c != '/')
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .take(MAX_NAME_LEN - SUFFIX_LEN - 1)
        .collect::<String>();
    // Labels must start and end with an alphanumeric character.
    let stem = match stem.trim_matches('-') {
        "" => "hostpath",
        stem => stem,
    };

    let mut rng = rand::thread_rng();
    loop {
        let suffix = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_CHARS[rng.gen_range(0..SUFFIX_CHARS.len())] as char)
            .collect::<String>();
        let name = format!("{stem}-{suffix}");
        if !taken.contains(&name) {
            return name;
        }
    }
}
