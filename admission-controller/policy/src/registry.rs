use admission_controller_core::{
    Applicability, Container, Denial, Operation, Policy, Request, ResourceKind,
};

/// Requires every container image to be pulled from a single registry.
#[derive(Clone, Debug)]
pub struct RegistryEnforcer {
    applicability: Applicability,

    /// The registry with a trailing `/`, or `None` when no registry was configured.
    prefix: Option<String>,
}

impl RegistryEnforcer {
    pub const NAME: &'static str = "RegistryEnforcer";

    pub fn new(registry: impl Into<String>) -> Self {
        let registry = registry.into();
        let registry = registry.trim_end_matches('/');
        Self {
            applicability: Applicability::new([Operation::Create, Operation::Update]),
            prefix: (!registry.is_empty()).then(|| format!("{registry}/")),
        }
    }

    fn check(prefix: &str, container: &Container) -> Result<(), Denial> {
        let image = container.image.as_deref().unwrap_or_default();
        if image.starts_with(prefix) {
            return Ok(());
        }
        Err(Denial::policy(format!(
            "container {} uses image {image:?}, which is not from the enforced registry {}",
            container.name,
            prefix.trim_end_matches('/'),
        )))
    }
}

impl Policy for RegistryEnforcer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applicability(&self) -> &Applicability {
        &self.applicability
    }

    fn admit(&self, req: &mut Request) -> Result<(), Denial> {
        let Some(ref prefix) = self.prefix else {
            return Err(Denial::internal(
                "RegistryEnforcer is enabled but no enforced registry is configured",
            ));
        };

        if req.kind != ResourceKind::Pod {
            return Ok(());
        }

        let pod = req.pod_mut()?;
        let Some(ref spec) = pod.spec else {
            return Ok(());
        };
        spec.init_containers
            .iter()
            .flatten()
            .chain(&spec.containers)
            .try_for_each(|c| Self::check(prefix, c))
    }
}
