use crate::cache::{DeletedObject, Informer, ResourceEventHandler};
use crate::expectations::UidTrackingExpectations;
use crate::owner::{controller_of, resolve_controller_ref};
use crate::workqueue::WorkQueue;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, error};
use vmsteward_core::{Resource, VirtualMachine};

fn enqueue_vm(queue: &dyn WorkQueue, vm: &VirtualMachine) {
    match vm.key() {
        Ok(key) => queue.add(&key),
        Err(e) => error!("Failed to extract key from virtualmachine: {}", e),
    }
}

/// Enqueues the key of every VM that changes
pub struct VmEventHandler {
    queue: Arc<dyn WorkQueue>,
}

impl VmEventHandler {
    pub fn new(queue: Arc<dyn WorkQueue>) -> Self {
        Self { queue }
    }
}

impl ResourceEventHandler<VirtualMachine> for VmEventHandler {
    fn on_add(&self, vm: &VirtualMachine) {
        enqueue_vm(self.queue.as_ref(), vm);
    }

    fn on_update(&self, _old: &VirtualMachine, new: &VirtualMachine) {
        enqueue_vm(self.queue.as_ref(), new);
    }

    fn on_delete(&self, vm: DeletedObject<VirtualMachine>) {
        enqueue_vm(self.queue.as_ref(), &vm.into_object());
    }
}

/// Maps launcher pod changes back to their VM and records observed
/// creations and deletions
pub struct PodEventHandler {
    queue: Arc<dyn WorkQueue>,
    vm_informer: Arc<Informer<VirtualMachine>>,
    pod_expectations: Arc<UidTrackingExpectations>,
}

impl PodEventHandler {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        vm_informer: Arc<Informer<VirtualMachine>>,
        pod_expectations: Arc<UidTrackingExpectations>,
    ) -> Self {
        Self {
            queue,
            vm_informer,
            pod_expectations,
        }
    }

    fn owner_of(&self, pod: &Pod) -> Option<VirtualMachine> {
        resolve_controller_ref(self.vm_informer.store(), pod.namespace(), &controller_of(pod))
    }

    fn handle_deleted_pod(&self, pod: &Pod) {
        let Some(vm) = self.owner_of(pod) else {
            return;
        };
        let (Ok(vm_key), Ok(pod_key)) = (vm.key(), pod.key()) else {
            return;
        };
        debug!("Pod {} deleted, owner {}", pod_key, vm_key);
        self.pod_expectations.deletion_observed(&vm_key, &pod_key);
        self.queue.add(&vm_key);
    }
}

impl ResourceEventHandler<Pod> for PodEventHandler {
    fn on_add(&self, pod: &Pod) {
        if pod.is_being_deleted() {
            // A restarted controller can first see a pod mid-teardown; that is
            // not the creation it may be waiting for
            self.handle_deleted_pod(pod);
            return;
        }

        let Some(vm) = self.owner_of(pod) else {
            return;
        };
        let Ok(vm_key) = vm.key() else {
            return;
        };
        debug!("Pod {}/{} created, owner {}", pod.namespace(), pod.name(), vm_key);
        self.pod_expectations.creation_observed(&vm_key);
        self.queue.add(&vm_key);
    }

    fn on_update(&self, old: &Pod, new: &Pod) {
        if new.resource_version() == old.resource_version() {
            // Resync noise: two versions of a pod always differ in resource version
            return;
        }

        let labels_changed = new.metadata.labels != old.metadata.labels;
        if new.is_being_deleted() {
            // Graceful deletion shows up as an update long before the pod is gone
            self.handle_deleted_pod(new);
            if labels_changed {
                self.handle_deleted_pod(old);
            }
            return;
        }

        let new_ref = controller_of(new);
        let old_ref = controller_of(old);
        if new_ref != old_ref {
            if let Some(old_vm) = resolve_controller_ref(self.vm_informer.store(), old.namespace(), &old_ref) {
                enqueue_vm(self.queue.as_ref(), &old_vm);
            }
        }

        let Some(vm) = resolve_controller_ref(self.vm_informer.store(), new.namespace(), &new_ref) else {
            return;
        };
        debug!("Pod {}/{} updated", new.namespace(), new.name());
        enqueue_vm(self.queue.as_ref(), &vm);
    }

    fn on_delete(&self, pod: DeletedObject<Pod>) {
        // A tombstone carries the last known state, which may be stale
        self.handle_deleted_pod(&pod.into_object());
    }
}
