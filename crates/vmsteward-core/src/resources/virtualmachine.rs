use crate::types::{
    GroupVersionKind, NODE_NAME_LABEL, PRESETS_APPLIED_ANNOTATION,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition type managed by the VM controller
pub const CONDITION_SYNCHRONIZED: &str = "Synchronized";

/// A declarative virtual machine, realized by a single launcher pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VirtualMachineSpec,
    #[serde(default)]
    pub status: VirtualMachineStatus,
}

fn default_api_version() -> String {
    GroupVersionKind::virtual_machine().api_version()
}

fn default_kind() -> String {
    "VirtualMachine".to_string()
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: VirtualMachineSpec::default(),
            status: VirtualMachineStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    #[serde(default)]
    pub domain: DomainSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub cores: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub phase: VmPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VirtualMachineCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VirtualMachineNetworkInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineNetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Lifecycle phase of a VirtualMachine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmPhase {
    /// Freshly created, nothing observed yet
    #[default]
    #[serde(rename = "")]
    Unset,
    Pending,
    /// Launcher pod created, waiting for it to become ready
    Scheduling,
    /// Pod handed over to the node agent
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for VmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmPhase::Unset => "",
            VmPhase::Pending => "Pending",
            VmPhase::Scheduling => "Scheduling",
            VmPhase::Scheduled => "Scheduled",
            VmPhase::Running => "Running",
            VmPhase::Succeeded => "Succeeded",
            VmPhase::Failed => "Failed",
            VmPhase::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

impl VirtualMachine {
    /// Create an empty VirtualMachine with identity set
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut vm = Self::default();
        vm.metadata.namespace = Some(namespace.into());
        vm.metadata.name = Some(name.into());
        vm
    }

    /// Nothing has been done for this VM yet
    pub fn is_unprocessed(&self) -> bool {
        matches!(self.status.phase, VmPhase::Unset | VmPhase::Pending)
    }

    pub fn is_scheduling(&self) -> bool {
        self.status.phase == VmPhase::Scheduling
    }

    pub fn is_scheduled(&self) -> bool {
        self.status.phase == VmPhase::Scheduled
    }

    pub fn is_running(&self) -> bool {
        self.status.phase == VmPhase::Running
    }

    /// The VM reached a terminal phase
    pub fn is_final(&self) -> bool {
        matches!(self.status.phase, VmPhase::Succeeded | VmPhase::Failed)
    }

    /// The preset/initialization pipeline has finished with this VM
    pub fn is_initialized(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(PRESETS_APPLIED_ANNOTATION))
    }

    /// Remove a finalizer, leaving the other entries in order
    pub fn remove_finalizer(&mut self, finalizer: &str) {
        if let Some(finalizers) = self.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
    }

    /// Record the node the VM was placed on, as label and status field
    pub fn set_node_name(&mut self, node_name: &str) {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(NODE_NAME_LABEL.to_string(), node_name.to_string());
        self.status.node_name = Some(node_name.to_string());
    }
}
