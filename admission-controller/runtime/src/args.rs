use crate::{
    admission::{Admission, AdmissionMetrics},
    duration::Interval,
    index::{self, KubeNamespaces, SyncMetrics, Synchronizer},
    policy::{self, PolicyName, RunAsUserMode},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "admission-controller", about = "A pod admission controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "admission=info,warn",
        env = "ADMISSION_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Comma-separated host paths that pods may mount.
    #[clap(long)]
    host_paths_allowed: Option<Paths>,

    /// Comma-separated host path prefixes under which pods may mount anything.
    #[clap(long)]
    host_path_prefixes_allowed: Option<Paths>,

    /// Comma-separated host paths mounted, read-only, into every container.
    #[clap(long)]
    host_automounts: Option<Paths>,

    /// The registry that all container images must be pulled from.
    #[clap(long)]
    enforced_docker_registry: Option<String>,

    /// How long a namespace watch may go without events before the cache is relisted.
    #[clap(long, default_value = "5m")]
    namespace_resync_interval: Interval,

    /// The policies to enforce, in evaluation order.
    #[clap(
        long,
        default_value = "HostAutomounter,HostPathEnforcer,RegistryEnforcer,UidEnforcer"
    )]
    policies: PolicyNames,

    /// Whether `UidEnforcer` overwrites containers' `runAsUser` (`overwrite`) or denies pods whose
    /// containers already set a security context (`strict`).
    #[clap(long, default_value = "overwrite")]
    run_as_user_mode: RunAsUserMode,
}

/// A comma-separated list. Empty items are dropped.
#[derive(Clone, Debug, Default)]
struct Paths(Vec<String>);

/// A comma-separated, ordered list of distinct policy names.
#[derive(Clone, Debug)]
struct PolicyNames(Vec<PolicyName>);

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            host_paths_allowed,
            host_path_prefixes_allowed,
            host_automounts,
            enforced_docker_registry,
            namespace_resync_interval,
            policies: PolicyNames(policies),
            run_as_user_mode,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let config = policy::Config {
            host_paths_allowed: host_paths_allowed.unwrap_or_default().0,
            host_path_prefixes_allowed: host_path_prefixes_allowed.unwrap_or_default().0,
            host_automounts: host_automounts.unwrap_or_default().0,
            enforced_registry: enforced_docker_registry.unwrap_or_default(),
            run_as_user_mode,
        };

        let mut prom = <Registry>::default();
        let sync_metrics = SyncMetrics::register(&mut prom);
        let admission_metrics = AdmissionMetrics::register(&mut prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // The namespace cache is populated in the background. Until the first listing completes,
        // policies that consult it deny every request.
        let (writer, namespaces) = index::pair();
        let sync = Synchronizer::new(KubeNamespaces::new(runtime.client()), writer)
            .with_resync_interval(namespace_resync_interval.into())
            .with_metrics(sync_metrics);
        tokio::spawn(sync.run().instrument(info_span!("namespaces")));

        if config.enforced_registry.is_empty() && policies.contains(&PolicyName::RegistryEnforcer)
        {
            warn!("RegistryEnforcer is enabled without --enforced-docker-registry; all requests it handles will be denied");
        }
        let chain = config.build(&policies, &namespaces);
        if chain.is_empty() {
            warn!("No admission policies are enabled");
        }
        info!(policies = ?chain, ?config, "Admission policies");

        let admission = Admission::new(chain, admission_metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

// === impl Paths ===

impl std::str::FromStr for Paths {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(ToString::to_string)
                .collect(),
        ))
    }
}

// === impl PolicyNames ===

impl std::str::FromStr for PolicyNames {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut names = Vec::new();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let name = name.parse::<PolicyName>()?;
            if names.contains(&name) {
                bail!("policy {name} is listed more than once");
            }
            names.push(name);
        }
        Ok(Self(names))
    }
}
