use crate::api_client::ApiClient;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use vmsteward_core::{Resource, VirtualMachine};

/// Event reasons; the failure reasons double as `Synchronized` condition reasons
pub const FAILED_CREATE_POD_REASON: &str = "FailedCreate";
pub const SUCCESSFUL_CREATE_POD_REASON: &str = "SuccessfulCreate";
pub const FAILED_DELETE_POD_REASON: &str = "FailedDelete";
pub const SUCCESSFUL_DELETE_POD_REASON: &str = "SuccessfulDelete";
pub const FAILED_HAND_OVER_POD_REASON: &str = "FailedHandOver";
pub const SUCCESSFUL_HAND_OVER_POD_REASON: &str = "SuccessfulHandOver";

/// Component name reported as the event source
const EVENT_SOURCE: &str = "vmsteward-controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Sink for user-visible events about a VirtualMachine.
///
/// Recording never fails from the caller's point of view and must not block.
pub trait EventRecorder: Send + Sync {
    fn event(&self, vm: &VirtualMachine, event_type: EventType, reason: &str, message: &str);
}

/// Writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn event(&self, vm: &VirtualMachine, event_type: EventType, reason: &str, message: &str) {
        let vm_key = format!("{}/{}", vm.namespace(), vm.name());
        match event_type {
            EventType::Normal => info!(vm = %vm_key, reason, "{}", message),
            EventType::Warning => warn!(vm = %vm_key, reason, "{}", message),
        }
    }
}

/// Posts core/v1 Events to the API server in the background
pub struct ApiEventRecorder {
    client: Arc<ApiClient>,
}

impl ApiEventRecorder {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

/// Build the core/v1 Event describing something that happened to `vm`
pub fn build_event(vm: &VirtualMachine, event_type: EventType, reason: &str, message: &str) -> Event {
    let now = Time(Utc::now());
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", vm.name())),
            namespace: Some(vm.namespace().to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(vm.api_version()),
            kind: Some(vm.kind()),
            name: Some(vm.name().to_string()),
            namespace: Some(vm.namespace().to_string()),
            uid: vm.uid().map(String::from),
            resource_version: vm.resource_version().map(String::from),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        source: Some(EventSource {
            component: Some(EVENT_SOURCE.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl EventRecorder for ApiEventRecorder {
    fn event(&self, vm: &VirtualMachine, event_type: EventType, reason: &str, message: &str) {
        TracingRecorder.event(vm, event_type, reason, message);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, dropping event {} for {}", reason, vm.name());
            return;
        };

        let event = build_event(vm, event_type, reason, message);
        let namespace = vm.namespace().to_string();
        let client = Arc::clone(&self.client);
        handle.spawn(async move {
            if let Err(e) = client.create_event(&namespace, &event).await {
                warn!("Failed to record event in namespace {}: {}", namespace, e);
            }
        });
    }
}

/// An event captured by [`RecordingRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub vm_key: String,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for RecordingRecorder {
    fn event(&self, vm: &VirtualMachine, event_type: EventType, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            vm_key: format!("{}/{}", vm.namespace(), vm.name()),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
