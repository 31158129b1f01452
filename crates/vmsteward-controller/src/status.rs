//! VirtualMachine phase state machine
//!
//! Phases `Running` and `Scheduled` belong to the node agent and are never
//! touched here. For the earlier phases the launcher pod's observed state
//! decides the next phase; for final phases the finalizer is released once
//! the pod is gone.

use crate::error::{ControllerError, Result};
use crate::matcher::{is_pod_owned_by_handler, pod_is_down_or_going_down, pod_is_ready};
use crate::recorder::{FAILED_CREATE_POD_REASON, FAILED_DELETE_POD_REASON, FAILED_HAND_OVER_POD_REASON};
use crate::traits::ClusterClient;
use k8s_openapi::api::core::v1::Pod;
use std::fmt::Display;
use tracing::debug;
use vmsteward_core::{
    Resource, VirtualMachine, VirtualMachineConditionManager, VirtualMachineNetworkInterface,
    VmPhase, VIRTUAL_MACHINE_FINALIZER,
};

/// Condition reason for a failed sync, derived from what the sync was attempting
pub fn failure_reason(vm: &VirtualMachine, pods: &[Pod]) -> &'static str {
    if pods.is_empty() {
        FAILED_CREATE_POD_REASON
    } else if vm.is_final() || vm.is_being_deleted() {
        FAILED_DELETE_POD_REASON
    } else {
        FAILED_HAND_OVER_POD_REASON
    }
}

/// Compute the desired VM after observing `pods`.
///
/// Returns `None` when the VM is owned by the node agent. The returned copy
/// may be identical to the input.
pub fn compute_status(
    vm: &VirtualMachine,
    pods: &[Pod],
    sync_err: Option<&ControllerError>,
) -> Option<VirtualMachine> {
    if vm.is_running() || vm.is_scheduled() {
        return None;
    }

    let mut next = vm.clone();

    if vm.is_unprocessed() || vm.is_scheduling() {
        if let Some(pod) = pods.first() {
            let ready = pod_is_ready(pod);
            let going_down = pod_is_down_or_going_down(pod);

            if is_pod_owned_by_handler(pod) {
                // The node agent took the pod, follow it with the VM
                let pod_ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
                let node_name = pod
                    .spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
                    .unwrap_or_default();
                next.status.interfaces = vec![VirtualMachineNetworkInterface { ip_address: pod_ip }];
                next.status.phase = VmPhase::Scheduled;
                next.set_node_name(&node_name);
            } else if !going_down && !ready {
                next.status.phase = VmPhase::Scheduling;
            } else if going_down {
                next.status.phase = VmPhase::Failed;
            }
        } else if vm.is_scheduling() {
            // Someone else removed the pod
            next.status.phase = VmPhase::Failed;
        }
    } else if vm.is_final() && pods.is_empty() {
        next.remove_finalizer(VIRTUAL_MACHINE_FINALIZER);
    }

    let reason = failure_reason(vm, pods);
    VirtualMachineConditionManager::new().check_failure(
        &mut next,
        sync_err.map(|e| e as &dyn Display),
        reason,
    );

    Some(next)
}

/// Whether `next` differs from `current` in anything the controller persists
pub fn needs_update(current: &VirtualMachine, next: &VirtualMachine) -> bool {
    current.status != next.status || current.metadata.finalizers != next.metadata.finalizers
}

/// Compute the next status and write it back if it changed
pub async fn update_status(
    client: &dyn ClusterClient,
    vm: &VirtualMachine,
    pods: &[Pod],
    sync_err: Option<&ControllerError>,
) -> Result<()> {
    let Some(next) = compute_status(vm, pods, sync_err) else {
        return Ok(());
    };

    if !needs_update(vm, &next) {
        return Ok(());
    }

    debug!(
        "Updating VM {}/{}: phase '{}' -> '{}'",
        vm.namespace(),
        vm.name(),
        vm.status.phase,
        next.status.phase
    );
    client.update_vm(&next).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{handed_over, make_pod, make_ready_pod, make_vm, make_vm_in_phase, terminating};
    use crate::mock::{ClusterCall, MockCluster, MockOperation};
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use vmsteward_core::{CONDITION_SYNCHRONIZED, NODE_NAME_LABEL};

    fn phase_after(vm: &VirtualMachine, pods: &[Pod]) -> VmPhase {
        compute_status(vm, pods, None).unwrap().status.phase
    }

    #[test]
    fn test_running_and_scheduled_are_left_alone() {
        for phase in [VmPhase::Running, VmPhase::Scheduled] {
            let vm = make_vm_in_phase("ns", "vm1", "uid-1", phase);
            let err = ControllerError::api_request_failed("create pod", Some(500), "boom");
            assert!(compute_status(&vm, &[], Some(&err)).is_none());

            let pod = terminating(make_pod(&vm, "pod-1"));
            assert!(compute_status(&vm, &[pod], None).is_none());
        }
    }

    #[test]
    fn test_handed_over_pod_schedules_vm() {
        let vm = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Scheduling);
        let pod = handed_over(make_ready_pod(&vm, "pod-1", "node01", "10.0.0.5"));

        let next = compute_status(&vm, &[pod], None).unwrap();
        assert_eq!(next.status.phase, VmPhase::Scheduled);
        assert_eq!(next.status.node_name.as_deref(), Some("node01"));
        assert_eq!(next.label(NODE_NAME_LABEL), Some("node01"));
        assert_eq!(
            next.status.interfaces,
            vec![VirtualMachineNetworkInterface {
                ip_address: Some("10.0.0.5".to_string())
            }]
        );
        assert!(needs_update(&vm, &next));
    }

    #[test]
    fn test_pending_pod_moves_vm_to_scheduling() {
        let vm = make_vm("ns", "vm1", "uid-1");
        assert_eq!(phase_after(&vm, &[make_pod(&vm, "pod-1")]), VmPhase::Scheduling);

        let pending = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Pending);
        assert_eq!(
            phase_after(&pending, &[make_pod(&pending, "pod-1")]),
            VmPhase::Scheduling
        );
    }

    #[test]
    fn test_ready_pod_not_yet_handed_over_keeps_phase() {
        let vm = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Scheduling);
        let pod = make_ready_pod(&vm, "pod-1", "node01", "10.0.0.5");
        let next = compute_status(&vm, &[pod], None).unwrap();
        assert_eq!(next.status.phase, VmPhase::Scheduling);
        assert!(!needs_update(&vm, &next));
    }

    #[test]
    fn test_terminating_pod_fails_vm() {
        let vm = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Scheduling);
        let pod = terminating(make_pod(&vm, "pod-1"));
        assert_eq!(phase_after(&vm, &[pod]), VmPhase::Failed);

        let mut succeeded = make_ready_pod(&vm, "pod-2", "node01", "10.0.0.5");
        succeeded.status.as_mut().unwrap().phase = Some("Succeeded".to_string());
        assert_eq!(phase_after(&vm, &[succeeded]), VmPhase::Failed);
    }

    #[test]
    fn test_vanished_pod_fails_scheduling_vm() {
        let vm = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Scheduling);
        assert_eq!(phase_after(&vm, &[]), VmPhase::Failed);

        // An unprocessed VM without pods simply has not got one yet
        let vm = make_vm("ns", "vm1", "uid-1");
        assert_eq!(phase_after(&vm, &[]), VmPhase::Unset);
    }

    #[test]
    fn test_final_vm_without_pods_releases_finalizer() {
        let vm = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Succeeded);
        let finalizer = vec![VIRTUAL_MACHINE_FINALIZER.to_string()];
        assert_eq!(vm.metadata.finalizers.as_ref(), Some(&finalizer));

        let next = compute_status(&vm, &[], None).unwrap();
        assert_eq!(next.metadata.finalizers, Some(vec![]));
        assert!(needs_update(&vm, &next));

        let with_pod = compute_status(&vm, &[make_pod(&vm, "pod-1")], None).unwrap();
        assert_eq!(with_pod.metadata.finalizers.as_ref(), Some(&finalizer));
    }

    #[test]
    fn test_failure_reason_selection() {
        let vm = make_vm("ns", "vm1", "uid-1");
        let pod = make_pod(&vm, "pod-1");
        assert_eq!(failure_reason(&vm, &[]), "FailedCreate");
        assert_eq!(failure_reason(&vm, &[pod.clone()]), "FailedHandOver");

        let failed = make_vm_in_phase("ns", "vm1", "uid-1", VmPhase::Failed);
        assert_eq!(failure_reason(&failed, &[pod.clone()]), "FailedDelete");

        let mut deleting = make_vm("ns", "vm1", "uid-1");
        deleting.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert_eq!(failure_reason(&deleting, &[pod]), "FailedDelete");
    }

    #[test]
    fn test_sync_error_sets_and_clears_condition() {
        let vm = make_vm("ns", "vm1", "uid-1");
        let err = ControllerError::api_request_failed("create pod", Some(500), "quota exceeded");

        let failed = compute_status(&vm, &[], Some(&err)).unwrap();
        let condition = &failed.status.conditions[0];
        assert_eq!(condition.type_, CONDITION_SYNCHRONIZED);
        assert_eq!(condition.reason.as_deref(), Some("FailedCreate"));
        assert!(condition.message.as_deref().unwrap().contains("quota exceeded"));

        let recovered = compute_status(&failed, &[], None).unwrap();
        assert!(recovered.status.conditions.is_empty());

        // No error and no condition leaves the VM untouched
        let untouched = compute_status(&vm, &[], None).unwrap();
        assert!(!needs_update(&vm, &untouched));
    }

    #[tokio::test]
    async fn test_update_status_writes_only_on_change() {
        let cluster = MockCluster::new();
        let vm = make_vm("ns", "vm1", "uid-1");

        update_status(&cluster, &vm, &[], None).await.unwrap();
        assert!(cluster.calls().await.is_empty());

        let pod = make_pod(&vm, "pod-1");
        update_status(&cluster, &vm, &[pod], None).await.unwrap();
        assert_eq!(
            cluster.calls().await,
            vec![ClusterCall::UpdateVm {
                namespace: "ns".to_string(),
                name: "vm1".to_string(),
            }]
        );
        assert_eq!(
            cluster.get_vm("ns", "vm1").await.unwrap().status.phase,
            VmPhase::Scheduling
        );
    }

    #[tokio::test]
    async fn test_update_status_propagates_write_failure() {
        let cluster = MockCluster::new();
        cluster.fail_on(MockOperation::UpdateVm).await;
        let vm = make_vm("ns", "vm1", "uid-1");

        let result = update_status(&cluster, &vm, &[make_pod(&vm, "pod-1")], None).await;
        assert!(result.is_err());
    }
}
