pub mod condition;
pub mod virtualmachine;

pub use condition::VirtualMachineConditionManager;
pub use virtualmachine::{
    CpuSpec, DomainSpec, VirtualMachine, VirtualMachineCondition, VirtualMachineNetworkInterface,
    VirtualMachineSpec, VirtualMachineStatus, VmPhase, CONDITION_SYNCHRONIZED,
};

use crate::types::{meta_namespace_key, GroupVersionKind};
use crate::Result;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Trait for resources held in the controller caches
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    /// Get the API version of this resource
    fn api_version(&self) -> String;

    /// Get the kind of this resource
    fn kind(&self) -> String;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Cache key (`namespace/name`)
    fn key(&self) -> Result<String> {
        meta_namespace_key(self.metadata())
    }

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    /// Look up a label value
    fn label(&self, name: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|l| l.get(name))
            .map(String::as_str)
    }

    /// Look up an annotation value
    fn annotation(&self, name: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(name))
            .map(String::as_str)
    }

    /// True once a graceful deletion has been requested
    fn is_being_deleted(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }
}

impl Resource for Pod {
    fn api_version(&self) -> String {
        "v1".to_string()
    }

    fn kind(&self) -> String {
        "Pod".to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for VirtualMachine {
    fn api_version(&self) -> String {
        GroupVersionKind::virtual_machine().api_version()
    }

    fn kind(&self) -> String {
        "VirtualMachine".to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    #[test]
    fn test_pod_resource_key() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("virt-launcher-vm1-abcde".to_string());
        pod.metadata.namespace = Some("default".to_string());

        assert_eq!(pod.key().unwrap(), "default/virt-launcher-vm1-abcde");
        assert_eq!(pod.kind(), "Pod");
        assert!(!pod.is_being_deleted());

        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(pod.is_being_deleted());
    }

    #[test]
    fn test_label_and_annotation_lookup() {
        let mut pod = Pod::default();
        pod.metadata.labels = Some(BTreeMap::from([(
            "app".to_string(),
            "web".to_string(),
        )]));

        assert_eq!(pod.label("app"), Some("web"));
        assert_eq!(pod.label("missing"), None);
        assert_eq!(pod.annotation("anything"), None);
    }

    #[test]
    fn test_virtual_machine_identity() {
        let vm = VirtualMachine::new("ns", "vm1");
        assert_eq!(vm.api_version(), "vmsteward.io/v1alpha1");
        assert_eq!(vm.kind(), "VirtualMachine");
        assert_eq!(vm.key().unwrap(), "ns/vm1");
    }
}
