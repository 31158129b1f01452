//! Owner resolution for launcher pods
//!
//! Launcher pods carry no stored owner reference. The owning VM is derived
//! from the domain label (name) and the created-by annotation (UID), then
//! verified against the VM cache.

use crate::cache::Store;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;
use vmsteward_core::{
    GroupVersionKind, Resource, VirtualMachine, CREATED_BY_ANNOTATION, DOMAIN_LABEL,
};

/// Synthesize the controller reference of a pod from its labels and annotations
pub fn controller_of(pod: &Pod) -> OwnerReference {
    let gvk = GroupVersionKind::virtual_machine();
    OwnerReference {
        api_version: gvk.api_version(),
        kind: gvk.kind,
        name: pod.label(DOMAIN_LABEL).unwrap_or_default().to_string(),
        uid: pod
            .annotation(CREATED_BY_ANNOTATION)
            .unwrap_or_default()
            .to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Look up the VM a controller reference points to.
///
/// Returns `None` when the kind is wrong, the VM is not cached, or the cached
/// VM with that name has a different UID (the name was reused).
pub fn resolve_controller_ref(
    store: &Store<VirtualMachine>,
    namespace: &str,
    controller_ref: &OwnerReference,
) -> Option<VirtualMachine> {
    if controller_ref.kind != GroupVersionKind::virtual_machine().kind {
        return None;
    }

    let vm = store.get_by_key(&format!("{}/{}", namespace, controller_ref.name))?;
    if vm.uid() != Some(controller_ref.uid.as_str()) {
        debug!(
            "VM {}/{} has uid {:?}, pod references {}",
            namespace,
            controller_ref.name,
            vm.uid(),
            controller_ref.uid
        );
        return None;
    }
    Some(vm)
}
