use crate::error::{ControllerError, Result};
use crate::expectations::UidTrackingExpectations;
use crate::matcher::{is_pod_owned_by_handler, pod_is_down_or_going_down, pod_is_ready};
use crate::recorder::*;
use crate::template::VmService;
use crate::traits::ClusterClient;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use vmsteward_core::{Resource, VirtualMachine, HANDLER_OWNER, OWNED_BY_ANNOTATION};

/// Drives a VM's launcher pod towards the desired state.
///
/// Each call to [`SyncEngine::sync`] issues at most one create, delete or
/// update against the cluster. Expectations are raised before the call and
/// lowered again right away when the call fails, so a lost action never
/// blocks later passes.
pub struct SyncEngine {
    client: Arc<dyn ClusterClient>,
    vm_service: VmService,
    recorder: Arc<dyn EventRecorder>,
    pod_expectations: Arc<UidTrackingExpectations>,
    handover_expectations: Arc<UidTrackingExpectations>,
}

impl SyncEngine {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        vm_service: VmService,
        recorder: Arc<dyn EventRecorder>,
        pod_expectations: Arc<UidTrackingExpectations>,
        handover_expectations: Arc<UidTrackingExpectations>,
    ) -> Self {
        Self {
            client,
            vm_service,
            recorder,
            pod_expectations,
            handover_expectations,
        }
    }

    /// Act on `vm` given its matching pods
    pub async fn sync(&self, vm: &VirtualMachine, pods: &[Pod]) -> Result<()> {
        let vm_key = vm.key()?;

        if vm.is_final() || vm.is_being_deleted() {
            return match pods.first() {
                Some(pod) if !pod.is_being_deleted() => self.delete_pod(vm, &vm_key, pod).await,
                _ => Ok(()),
            };
        }

        match pods {
            [] => {
                // A pod was created before if the phase moved on; never recreate it
                if !vm.is_unprocessed() {
                    return Ok(());
                }
                self.create_pod(vm, &vm_key).await
            }
            [pod] => {
                if pod_is_ready(pod) && !pod_is_down_or_going_down(pod) && !is_pod_owned_by_handler(pod) {
                    self.hand_over_pod(vm, &vm_key, pod).await
                } else {
                    debug!("Nothing to do for VM {}, waiting on pod {}", vm_key, pod.name());
                    Ok(())
                }
            }
            _ => Err(ControllerError::multiple_pods(vm_key, pods.len())),
        }
    }

    async fn delete_pod(&self, vm: &VirtualMachine, vm_key: &str, pod: &Pod) -> Result<()> {
        let pod_key = pod.key()?;
        self.pod_expectations
            .expect_deletions(vm_key, std::slice::from_ref(&pod_key));

        if let Err(e) = self.client.delete_pod(vm.namespace(), pod.name()).await {
            self.recorder.event(
                vm,
                EventType::Warning,
                FAILED_DELETE_POD_REASON,
                &format!("Error deleting pod: {}", e),
            );
            self.pod_expectations.deletion_observed(vm_key, &pod_key);
            return Err(e);
        }

        info!("Deleted launcher pod {} of VM {}", pod.name(), vm_key);
        self.recorder.event(
            vm,
            EventType::Normal,
            SUCCESSFUL_DELETE_POD_REASON,
            &format!("Deleted virtual machine pod {}", pod.name()),
        );
        Ok(())
    }

    async fn create_pod(&self, vm: &VirtualMachine, vm_key: &str) -> Result<()> {
        self.pod_expectations.expect_creations(vm_key, 1);

        match self.vm_service.start_vm_pod(vm).await {
            Ok(pod) => {
                info!("Created launcher pod {} for VM {}", pod.name(), vm_key);
                self.recorder.event(
                    vm,
                    EventType::Normal,
                    SUCCESSFUL_CREATE_POD_REASON,
                    &format!("Created virtual machine pod {}", pod.name()),
                );
                Ok(())
            }
            Err(e) => {
                self.recorder.event(
                    vm,
                    EventType::Warning,
                    FAILED_CREATE_POD_REASON,
                    &format!("Error creating pod: {}", e),
                );
                self.pod_expectations.creation_observed(vm_key);
                Err(e)
            }
        }
    }

    async fn hand_over_pod(&self, vm: &VirtualMachine, vm_key: &str, pod: &Pod) -> Result<()> {
        let mut pod = pod.clone();
        pod.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(OWNED_BY_ANNOTATION.to_string(), HANDLER_OWNER.to_string());

        self.handover_expectations.expect_creations(vm_key, 1);
        if let Err(e) = self.client.update_pod(&pod).await {
            self.handover_expectations.creation_observed(vm_key);
            self.recorder.event(
                vm,
                EventType::Warning,
                FAILED_HAND_OVER_POD_REASON,
                &format!("Error on handing over pod: {}", e),
            );
            return Err(ControllerError::hand_over_failed(pod.name(), e));
        }

        info!("Handed launcher pod {} of VM {} over to {}", pod.name(), vm_key, HANDLER_OWNER);
        self.recorder.event(
            vm,
            EventType::Normal,
            SUCCESSFUL_HAND_OVER_POD_REASON,
            &format!("Pod ownership transferred to the node {}", pod.name()),
        );
        Ok(())
    }
}
