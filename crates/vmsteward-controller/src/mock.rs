use crate::error::{ControllerError, Result};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use vmsteward_core::{Resource, VirtualMachine};

/// Mutating operations of [`ClusterClient`], for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    CreatePod,
    DeletePod,
    UpdatePod,
    UpdateVm,
}

/// A mutating call received by [`MockCluster`], successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    CreatePod { namespace: String, name: String },
    DeletePod { namespace: String, name: String },
    UpdatePod { namespace: String, name: String },
    UpdateVm { namespace: String, name: String },
}

/// In-memory cluster for tests
///
/// Stores pods and VMs by `namespace/name`, records every mutating call and
/// can be told to fail specific operations. Writes check the resource
/// version of an existing object and bump it on success.
#[derive(Default)]
pub struct MockCluster {
    pods: Arc<RwLock<HashMap<String, Pod>>>,
    vms: Arc<RwLock<HashMap<String, VirtualMachine>>>,
    calls: Arc<RwLock<Vec<ClusterCall>>>,
    failures: Arc<RwLock<HashSet<MockOperation>>>,
}

fn next_resource_version(current: Option<&str>) -> String {
    let rv = current.and_then(|rv| rv.parse::<u64>().ok()).unwrap_or(0);
    (rv + 1).to_string()
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail until cleared
    pub async fn fail_on(&self, op: MockOperation) {
        self.failures.write().await.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    async fn check_failure(&self, op: MockOperation) -> Result<()> {
        if self.failures.read().await.contains(&op) {
            return Err(ControllerError::api_request_failed(
                format!("{:?}", op),
                Some(500),
                "injected failure",
            ));
        }
        Ok(())
    }

    pub async fn seed_pod(&self, pod: Pod) -> Result<()> {
        let key = pod.key()?;
        self.pods.write().await.insert(key, pod);
        Ok(())
    }

    pub async fn seed_vm(&self, vm: VirtualMachine) -> Result<()> {
        let key = vm.key()?;
        self.vms.write().await.insert(key, vm);
        Ok(())
    }

    pub async fn pods(&self) -> Vec<Pod> {
        self.pods.read().await.values().cloned().collect()
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .await
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub async fn get_vm(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        self.vms
            .read()
            .await
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.calls.read().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn record(&self, call: ClusterCall) {
        debug!("Mock: {:?}", call);
        self.calls.write().await.push(call);
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let mut created = pod.clone();
        if created.metadata.name.is_none() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            created.metadata.name = Some(format!("{}{}", prefix, &suffix[..5]));
        }
        created.metadata.namespace = Some(namespace.to_string());

        self.record(ClusterCall::CreatePod {
            namespace: namespace.to_string(),
            name: created.name().to_string(),
        })
        .await;
        self.check_failure(MockOperation::CreatePod).await?;

        let key = created.key()?;
        let mut pods = self.pods.write().await;
        if pods.contains_key(&key) {
            return Err(ControllerError::conflict(key, "pod already exists"));
        }
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some("1".to_string());
        pods.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(ClusterCall::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
        .await;
        self.check_failure(MockOperation::DeletePod).await?;

        let key = format!("{}/{}", namespace, name);
        match self.pods.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => Err(ControllerError::api_request_failed(
                "delete pod",
                Some(404),
                format!("pod {} not found", key),
            )),
        }
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        self.record(ClusterCall::UpdatePod {
            namespace: pod.namespace().to_string(),
            name: pod.name().to_string(),
        })
        .await;
        self.check_failure(MockOperation::UpdatePod).await?;

        let key = pod.key()?;
        let mut pods = self.pods.write().await;
        let stored = pods.get(&key).ok_or_else(|| {
            ControllerError::api_request_failed("update pod", Some(404), format!("pod {} not found", key))
        })?;
        if stored.resource_version() != pod.resource_version() {
            return Err(ControllerError::conflict(key, "resourceVersion mismatch"));
        }

        let mut updated = pod.clone();
        updated.metadata.resource_version = Some(next_resource_version(pod.resource_version()));
        pods.insert(key, updated.clone());
        Ok(updated)
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods().await)
    }

    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine> {
        self.record(ClusterCall::UpdateVm {
            namespace: vm.namespace().to_string(),
            name: vm.name().to_string(),
        })
        .await;
        self.check_failure(MockOperation::UpdateVm).await?;

        let key = vm.key()?;
        let mut vms = self.vms.write().await;
        if let Some(stored) = vms.get(&key) {
            if stored.resource_version() != vm.resource_version() {
                return Err(ControllerError::conflict(key, "resourceVersion mismatch"));
            }
        }

        let mut updated = vm.clone();
        updated.metadata.resource_version = Some(next_resource_version(vm.resource_version()));
        vms.insert(key, updated.clone());
        Ok(updated)
    }

    async fn list_vms(&self) -> Result<Vec<VirtualMachine>> {
        Ok(self.vms.read().await.values().cloned().collect())
    }
}
