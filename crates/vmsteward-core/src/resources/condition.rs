use super::virtualmachine::{VirtualMachine, VirtualMachineCondition, CONDITION_SYNCHRONIZED};
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::fmt::Display;

/// Maintains the `Synchronized` failure condition on a VirtualMachine
#[derive(Debug, Clone, Copy, Default)]
pub struct VirtualMachineConditionManager;

impl VirtualMachineConditionManager {
    pub fn new() -> Self {
        Self
    }

    pub fn has_condition(&self, vm: &VirtualMachine, condition_type: &str) -> bool {
        vm.status
            .conditions
            .iter()
            .any(|c| c.type_ == condition_type)
    }

    pub fn remove_condition(&self, vm: &mut VirtualMachine, condition_type: &str) {
        vm.status.conditions.retain(|c| c.type_ != condition_type);
    }

    /// Attach or clear the `Synchronized=False` condition.
    ///
    /// With an error, the condition is added unless one is already present (the
    /// first failure's reason and timestamps are kept). Without an error, an
    /// existing condition is removed. Returns whether the VM was changed.
    pub fn check_failure(
        &self,
        vm: &mut VirtualMachine,
        sync_err: Option<&dyn Display>,
        reason: &str,
    ) -> bool {
        match sync_err {
            Some(err) => {
                if self.has_condition(vm, CONDITION_SYNCHRONIZED) {
                    return false;
                }
                let now = Time(Utc::now());
                vm.status.conditions.push(VirtualMachineCondition {
                    type_: CONDITION_SYNCHRONIZED.to_string(),
                    status: "False".to_string(),
                    last_probe_time: Some(now.clone()),
                    last_transition_time: Some(now),
                    reason: Some(reason.to_string()),
                    message: Some(err.to_string()),
                });
                true
            }
            None => {
                if !self.has_condition(vm, CONDITION_SYNCHRONIZED) {
                    return false;
                }
                self.remove_condition(vm, CONDITION_SYNCHRONIZED);
                true
            }
        }
    }
}
