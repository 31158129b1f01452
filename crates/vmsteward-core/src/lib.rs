//! vmsteward Core - resource types shared by the VirtualMachine controller
//!
//! This crate provides:
//! - The VirtualMachine resource, its phases and conditions
//! - Well-known labels and annotations linking launcher pods to their VM
//! - Error types with miette diagnostics
//! - Cache key helpers

pub mod error;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StewardError};
pub use resources::{
    Resource, VirtualMachine, VirtualMachineCondition, VirtualMachineConditionManager,
    VirtualMachineNetworkInterface, VirtualMachineSpec, VirtualMachineStatus, VmPhase,
    CONDITION_SYNCHRONIZED,
};
pub use types::*;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Pod;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
