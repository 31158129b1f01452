use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use vmsteward_core::VirtualMachine;

/// Trait for the cluster API the controller reads from and writes to
///
/// Every mutating call is synchronous from the controller's point of view
/// and is never retried here; failed passes are retried by re-queuing the
/// VM key. The effects become visible to the controller only through its
/// caches. `MockCluster` implements this for tests.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    // --- Pods ---

    /// Create a pod in `namespace` (the server may assign the name)
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// Delete a pod by name
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace a pod (metadata changes such as annotations)
    async fn update_pod(&self, pod: &Pod) -> Result<Pod>;

    /// List pods in all namespaces
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    // --- VirtualMachines ---

    /// Replace a VirtualMachine including its status and finalizers
    async fn update_vm(&self, vm: &VirtualMachine) -> Result<VirtualMachine>;

    /// List VirtualMachines in all namespaces
    async fn list_vms(&self) -> Result<Vec<VirtualMachine>>;
}
