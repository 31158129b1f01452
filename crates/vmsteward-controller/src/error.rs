use miette::Diagnostic;
use thiserror::Error;

/// Error type for VirtualMachine reconciliation
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// A call to the cluster API failed
    #[error("{operation} failed: {message}")]
    #[diagnostic(
        code(vmsteward::controller::api_request_failed),
        help("Check that the API server is reachable. The VM key is re-queued with backoff")
    )]
    ApiRequestFailed {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        status: Option<u16>,
        #[allow(unused)]
        message: String,
    },

    /// Write rejected because the object changed underneath us
    #[error("Conflict updating {resource}: {message}")]
    #[diagnostic(
        code(vmsteward::controller::conflict),
        help("The cached copy was stale. The next pass will retry with the latest version")
    )]
    Conflict {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// More than one launcher pod matches a VM
    #[error("Found {count} matching pods where only one should exist")]
    #[diagnostic(
        code(vmsteward::controller::multiple_pods),
        help("Remove the extra launcher pods of {vm_key} manually. The controller will not pick one for you")
    )]
    MultiplePods {
        #[allow(unused)]
        vm_key: String,
        #[allow(unused)]
        count: usize,
    },

    /// Transferring pod ownership to the node agent failed
    #[error("failed to hand over pod {pod_name} to virt-handler: {source}")]
    #[diagnostic(
        code(vmsteward::controller::hand_over_failed),
        help("The pod update was rejected. The handover is retried on the next pass")
    )]
    HandOverFailed {
        #[allow(unused)]
        pod_name: String,
        #[source]
        source: Box<ControllerError>,
    },

    /// Rendering the launcher pod failed
    #[error("Failed to render launcher pod for VM '{vm_name}': {message}")]
    #[diagnostic(
        code(vmsteward::controller::template_failed),
        help("Check the VirtualMachine spec and metadata (name and uid are required)")
    )]
    TemplateFailed {
        #[allow(unused)]
        vm_name: String,
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] vmsteward_core::StewardError),
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn api_request_failed(
        operation: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::ApiRequestFailed {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn multiple_pods(vm_key: impl Into<String>, count: usize) -> Self {
        Self::MultiplePods {
            vm_key: vm_key.into(),
            count,
        }
    }

    pub fn hand_over_failed(pod_name: impl Into<String>, source: ControllerError) -> Self {
        Self::HandOverFailed {
            pod_name: pod_name.into(),
            source: Box::new(source),
        }
    }

    pub fn template_failed(vm_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateFailed {
            vm_name: vm_name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_over_failed_wraps_source() {
        let err = ControllerError::hand_over_failed(
            "virt-launcher-vm1-x",
            ControllerError::conflict("pod default/virt-launcher-vm1-x", "resourceVersion mismatch"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("failed to hand over pod virt-launcher-vm1-x to virt-handler"));
        assert!(msg.contains("resourceVersion mismatch"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_multiple_pods_message() {
        let err = ControllerError::multiple_pods("ns/vm1", 2);
        assert_eq!(
            err.to_string(),
            "Found 2 matching pods where only one should exist"
        );
    }
}
