use crate::error::{Result, StewardError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// API group served for VirtualMachine resources
pub const GROUP_NAME: &str = "vmsteward.io";

/// Label carrying the name of the VirtualMachine a launcher pod runs
pub const DOMAIN_LABEL: &str = "vmsteward.io/domain";
/// Role label; launcher pods carry `vmsteward.io: virt-launcher`
pub const APP_LABEL: &str = "vmsteward.io";
/// Value of [`APP_LABEL`] on launcher pods
pub const LAUNCHER_APP: &str = "virt-launcher";
/// Label set on a VirtualMachine once it is bound to a node
pub const NODE_NAME_LABEL: &str = "vmsteward.io/nodeName";

/// Annotation holding the UID of the VirtualMachine that created a pod
pub const CREATED_BY_ANNOTATION: &str = "vmsteward.io/created-by";
/// Annotation naming the component currently owning a launcher pod
pub const OWNED_BY_ANNOTATION: &str = "vmsteward.io/owned-by";
/// Owner identity of the node-side agent that takes over healthy pods
pub const HANDLER_OWNER: &str = "virt-handler";

/// Annotation set by the preset controller once a VM is initialized
pub const PRESETS_APPLIED_ANNOTATION: &str =
    "presets.virtualmachines.vmsteward.io/presets-applied";

/// Finalizer keeping a VirtualMachine around until its pod is gone
pub const VIRTUAL_MACHINE_FINALIZER: &str = "foregroundDeleteVirtualMachine";

/// GroupVersionKind uniquely identifies a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "vmsteward.io")
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "VirtualMachine")
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// GVK of the VirtualMachine resource
    pub fn virtual_machine() -> Self {
        Self::new(GROUP_NAME, "v1alpha1", "VirtualMachine")
    }

    /// GVK of core/v1 Pods
    pub fn pod() -> Self {
        Self::new("", "v1", "Pod")
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Get the API path prefix
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else {
            format!("{}s", lower)
        }
    }

    /// Path of a namespaced collection, e.g. `/api/v1/namespaces/default/pods`
    pub fn collection_path(&self, namespace: &str) -> String {
        format!(
            "/{}/namespaces/{}/{}",
            self.api_path(),
            namespace,
            self.resource_name()
        )
    }

    /// Path of a cluster-wide list, e.g. `/api/v1/pods`
    pub fn list_path(&self) -> String {
        format!("/{}/{}", self.api_path(), self.resource_name())
    }

    /// Path of a single namespaced object
    pub fn object_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

/// Build the `namespace/name` cache key for an object
///
/// Cluster-scoped objects are keyed by their bare name.
pub fn meta_namespace_key(metadata: &ObjectMeta) -> Result<String> {
    let name = metadata
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| StewardError::invalid_resource("object has no name", "Set metadata.name"))?;

    match metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => Ok(format!("{}/{}", ns, name)),
        _ => Ok(name.to_string()),
    }
}
