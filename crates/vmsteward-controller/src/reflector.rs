use crate::cache::Informer;
use crate::error::Result;
use crate::traits::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vmsteward_core::{Resource, VirtualMachine};

/// Resources a reflector can list from the cluster
#[async_trait]
pub trait Listable: Resource {
    async fn list_all(client: &dyn ClusterClient) -> Result<Vec<Self>>;
}

#[async_trait]
impl Listable for Pod {
    async fn list_all(client: &dyn ClusterClient) -> Result<Vec<Self>> {
        client.list_pods().await
    }
}

#[async_trait]
impl Listable for VirtualMachine {
    async fn list_all(client: &dyn ClusterClient) -> Result<Vec<Self>> {
        client.list_vms().await
    }
}

/// Configuration for a reflector
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Time between two full listings
    pub resync_interval: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(5),
        }
    }
}

/// Keeps an informer in line with the cluster by periodic relisting
pub struct Reflector<K> {
    informer: Arc<Informer<K>>,
    client: Arc<dyn ClusterClient>,
    config: ReflectorConfig,
}

impl<K: Listable> Reflector<K> {
    pub fn new(
        informer: Arc<Informer<K>>,
        client: Arc<dyn ClusterClient>,
        config: ReflectorConfig,
    ) -> Self {
        Self {
            informer,
            client,
            config,
        }
    }

    /// List once and apply the result; the informer counts as synced afterwards
    pub async fn list_once(&self) -> Result<usize> {
        let objects = K::list_all(self.client.as_ref()).await?;
        let count = objects.len();
        self.informer.replace(objects);
        self.informer.mark_synced();
        Ok(count)
    }

    /// Relist until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting {} reflector (resync every {:?})",
            self.informer.name(),
            self.config.resync_interval
        );

        loop {
            match self.list_once().await {
                Ok(count) => debug!("{} reflector listed {} objects", self.informer.name(), count),
                Err(e) => warn!("{} reflector list failed: {}", self.informer.name(), e),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.resync_interval) => {}
            }
        }

        info!("{} reflector stopped", self.informer.name());
    }
}
