use crate::error::{ControllerError, Result};
use crate::traits::ClusterClient;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use vmsteward_core::{
    Resource, VirtualMachine, APP_LABEL, CREATED_BY_ANNOTATION, DOMAIN_LABEL, LAUNCHER_APP,
};

/// Image used for the launcher container when none is configured
pub const DEFAULT_LAUNCHER_IMAGE: &str = "vmsteward/virt-launcher:latest";

/// Name of the container running the VM inside the launcher pod
pub const COMPUTE_CONTAINER: &str = "compute";

/// Turns a VirtualMachine into the pod that hosts it
pub trait TemplateService: Send + Sync {
    fn render_launch_manifest(&self, vm: &VirtualMachine) -> Result<Pod>;
}

/// Renders `virt-launcher` pods
#[derive(Debug, Clone)]
pub struct LauncherTemplateService {
    launcher_image: String,
}

impl LauncherTemplateService {
    pub fn new(launcher_image: impl Into<String>) -> Self {
        Self {
            launcher_image: launcher_image.into(),
        }
    }

    pub fn launcher_image(&self) -> &str {
        &self.launcher_image
    }
}

impl Default for LauncherTemplateService {
    fn default() -> Self {
        Self::new(DEFAULT_LAUNCHER_IMAGE)
    }
}

impl TemplateService for LauncherTemplateService {
    fn render_launch_manifest(&self, vm: &VirtualMachine) -> Result<Pod> {
        let vm_name = vm
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::template_failed("<unknown>", "VM has no name"))?;
        let uid = vm
            .uid()
            .ok_or_else(|| ControllerError::template_failed(vm_name, "VM has no uid"))?;
        let namespace = vm.namespace();

        let requests = vm.spec.domain.memory.as_ref().map(|memory| {
            BTreeMap::from([("memory".to_string(), memory.clone())])
        });

        let container = Container {
            name: COMPUTE_CONTAINER.to_string(),
            image: Some(self.launcher_image.clone()),
            command: Some(vec!["/virt-launcher".to_string()]),
            args: Some(vec![
                "--name".to_string(),
                vm_name.to_string(),
                "--namespace".to_string(),
                namespace.to_string(),
            ]),
            resources: requests.map(|requests| ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        };

        let pod = Pod {
            metadata: ObjectMeta {
                generate_name: Some(format!("virt-launcher-{}-", vm_name)),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([
                    (DOMAIN_LABEL.to_string(), vm_name.to_string()),
                    (APP_LABEL.to_string(), LAUNCHER_APP.to_string()),
                ])),
                annotations: Some(BTreeMap::from([(
                    CREATED_BY_ANNOTATION.to_string(),
                    uid.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                node_selector: vm.spec.node_selector.clone(),
                termination_grace_period_seconds: vm.spec.termination_grace_period_seconds,
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            status: None,
        };

        Ok(pod)
    }
}

/// Starts launcher pods for VirtualMachines
pub struct VmService {
    client: Arc<dyn ClusterClient>,
    template: Arc<dyn TemplateService>,
}

impl VmService {
    pub fn new(client: Arc<dyn ClusterClient>, template: Arc<dyn TemplateService>) -> Self {
        Self { client, template }
    }

    /// Render the launcher pod for `vm` and create it
    pub async fn start_vm_pod(&self, vm: &VirtualMachine) -> Result<Pod> {
        let pod = self.template.render_launch_manifest(vm)?;
        debug!("Creating launcher pod for VM {}/{}", vm.namespace(), vm.name());
        self.client.create_pod(vm.namespace(), &pod).await
    }
}
