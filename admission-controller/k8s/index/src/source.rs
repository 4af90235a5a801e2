use crate::cache::NamespaceMetadata;
use anyhow::{anyhow, Result};
use futures::{prelude::*, stream::BoxStream};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, WatchParams};

/// A full enumeration of namespaces.
#[derive(Clone, Debug, Default)]
pub struct Listing {
    pub items: Vec<NamespaceMetadata>,

    /// The version at which the listing was taken. Watches resume from here.
    pub resource_version: String,
}

/// A change to a single namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Added(NamespaceMetadata),
    Modified(NamespaceMetadata),
    Deleted(NamespaceMetadata),

    /// A progress marker carrying no object.
    Bookmark,
}

/// An ordered stream of namespace changes. An error item terminates the watch.
pub type EventStream = BoxStream<'static, Result<WatchEvent>>;

/// Provides the current set of namespaces and a stream of changes to it.
#[async_trait::async_trait]
pub trait NamespaceSource: Send + Sync + 'static {
    async fn list(&self) -> Result<Listing>;

    async fn watch(&self, resource_version: &str) -> Result<EventStream>;
}

/// Lists and watches namespaces through the Kubernetes API.
#[derive(Clone)]
pub struct KubeNamespaces {
    api: Api<Namespace>,
}

// === impl KubeNamespaces ===

impl KubeNamespaces {
    /// Limits the amount of time a watch can be open before the server closes it.
    ///
    /// Must be less than 295 or Kubernetes throws an error.
    const WATCH_TIMEOUT_SECS: u32 = 290;

    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl NamespaceSource for KubeNamespaces {
    async fn list(&self) -> Result<Listing> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(Listing {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items.into_iter().map(Into::into).collect(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<EventStream> {
        let params = WatchParams::default().timeout(Self::WATCH_TIMEOUT_SECS);
        let events = self.api.watch(&params, resource_version).await?;
        Ok(events
            .map(|ev| match ev {
                Ok(kube::api::WatchEvent::Added(ns)) => Ok(WatchEvent::Added(ns.into())),
                Ok(kube::api::WatchEvent::Modified(ns)) => Ok(WatchEvent::Modified(ns.into())),
                Ok(kube::api::WatchEvent::Deleted(ns)) => Ok(WatchEvent::Deleted(ns.into())),
                Ok(kube::api::WatchEvent::Bookmark(_)) => Ok(WatchEvent::Bookmark),
                Ok(kube::api::WatchEvent::Error(status)) => {
                    Err(anyhow!("watch failed: {status:?}"))
                }
                Err(error) => Err(error.into()),
            })
            .boxed())
    }
}
