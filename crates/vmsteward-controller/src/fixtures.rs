//! Builders for VMs and launcher pods shared by the unit tests

use chrono::Utc;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use vmsteward_core::{
    Resource, VirtualMachine, VmPhase, APP_LABEL, CREATED_BY_ANNOTATION, DOMAIN_LABEL,
    HANDLER_OWNER, LAUNCHER_APP, OWNED_BY_ANNOTATION, PRESETS_APPLIED_ANNOTATION,
    VIRTUAL_MACHINE_FINALIZER,
};

/// An initialized VM in phase `Unset`, carrying the controller finalizer
pub fn make_vm(namespace: &str, name: &str, uid: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new(namespace, name);
    vm.metadata.uid = Some(uid.to_string());
    vm.metadata.resource_version = Some("1".to_string());
    vm.metadata.annotations = Some(BTreeMap::from([(
        PRESETS_APPLIED_ANNOTATION.to_string(),
        "v1alpha1".to_string(),
    )]));
    vm.metadata.finalizers = Some(vec![VIRTUAL_MACHINE_FINALIZER.to_string()]);
    vm
}

pub fn make_vm_in_phase(namespace: &str, name: &str, uid: &str, phase: VmPhase) -> VirtualMachine {
    let mut vm = make_vm(namespace, name, uid);
    vm.status.phase = phase;
    vm
}

/// A pending launcher pod created for `vm`
pub fn make_pod(vm: &VirtualMachine, name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(vm.namespace().to_string());
    pod.metadata.uid = Some(format!("pod-uid-{}", name));
    pod.metadata.resource_version = Some("1".to_string());
    pod.metadata.labels = Some(BTreeMap::from([
        (DOMAIN_LABEL.to_string(), vm.name().to_string()),
        (APP_LABEL.to_string(), LAUNCHER_APP.to_string()),
    ]));
    pod.metadata.annotations = Some(BTreeMap::from([(
        CREATED_BY_ANNOTATION.to_string(),
        vm.uid().unwrap_or_default().to_string(),
    )]));
    pod.spec = Some(PodSpec::default());
    pod.status = Some(PodStatus {
        phase: Some("Pending".to_string()),
        ..Default::default()
    });
    pod
}

/// A running launcher pod whose containers are all ready
pub fn make_ready_pod(vm: &VirtualMachine, name: &str, node: &str, ip: &str) -> Pod {
    let mut pod = make_pod(vm, name);
    pod.spec.as_mut().unwrap().node_name = Some(node.to_string());
    pod.status = Some(PodStatus {
        phase: Some("Running".to_string()),
        pod_ip: Some(ip.to_string()),
        container_statuses: Some(vec![ContainerStatus {
            name: "compute".to_string(),
            ready: true,
            ..Default::default()
        }]),
        ..Default::default()
    });
    pod
}

/// Mark a pod as taken over by the node agent
pub fn handed_over(mut pod: Pod) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(OWNED_BY_ANNOTATION.to_string(), HANDLER_OWNER.to_string());
    bump_resource_version(&mut pod);
    pod
}

pub fn terminating(mut pod: Pod) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
    bump_resource_version(&mut pod);
    pod
}

pub fn bump_resource_version<K: Resource>(obj: &mut K) {
    let next = obj
        .resource_version()
        .and_then(|rv| rv.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj.metadata_mut().resource_version = Some(next.to_string());
}
