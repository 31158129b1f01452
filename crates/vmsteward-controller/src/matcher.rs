//! Pod selection and pod state predicates

use k8s_openapi::api::core::v1::Pod;
use vmsteward_core::{
    Resource, VirtualMachine, APP_LABEL, CREATED_BY_ANNOTATION, DOMAIN_LABEL, HANDLER_OWNER,
    LAUNCHER_APP, OWNED_BY_ANNOTATION,
};

/// Pods launched for `vm`, in input order.
///
/// A pod matches when it carries the launcher labels for the VM's name and
/// its created-by annotation equals the VM's UID. The annotation check keeps
/// a pod of a deleted VM with the same name from matching its successor.
pub fn filter_matching_pods(vm: &VirtualMachine, pods: Vec<Pod>) -> Vec<Pod> {
    let uid = vm.uid().unwrap_or_default();
    pods.into_iter()
        .filter(|pod| {
            pod.label(DOMAIN_LABEL) == Some(vm.name())
                && pod.label(APP_LABEL) == Some(LAUNCHER_APP)
                && pod.annotation(CREATED_BY_ANNOTATION) == Some(uid)
        })
        .collect()
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

/// Running with every container ready
pub fn pod_is_ready(pod: &Pod) -> bool {
    let all_ready = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map_or(true, |statuses| statuses.iter().all(|c| c.ready));
    all_ready && pod_phase(pod) == "Running"
}

pub fn pod_is_down(pod: &Pod) -> bool {
    matches!(pod_phase(pod), "Succeeded" | "Failed")
}

/// Terminal, or deletion requested
pub fn pod_is_down_or_going_down(pod: &Pod) -> bool {
    pod_is_down(pod) || pod.is_being_deleted()
}

/// The node agent has taken the pod over
pub fn is_pod_owned_by_handler(pod: &Pod) -> bool {
    pod.annotation(OWNED_BY_ANNOTATION) == Some(HANDLER_OWNER)
}
