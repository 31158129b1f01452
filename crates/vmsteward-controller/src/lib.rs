// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod cache;
pub mod controller;
pub mod error;
pub mod expectations;
pub mod handlers;
pub mod matcher;
pub mod mock;
pub mod owner;
pub mod recorder;
pub mod reflector;
pub mod status;
pub mod sync;
pub mod template;
pub mod traits;
pub mod workqueue;

#[cfg(test)]
mod fixtures;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use mock::MockCluster;
pub use traits::ClusterClient;

// Re-export controller building blocks
pub use api_client::ApiClient;
pub use cache::{DeletedFinalStateUnknown, DeletedObject, Informer, ResourceEventHandler, Store};
pub use controller::{VmController, VmControllerConfig};
pub use expectations::{ControllerExpectations, UidTrackingExpectations};
pub use recorder::{
    ApiEventRecorder, EventRecorder, EventType, RecordingRecorder, TracingRecorder,
};
pub use reflector::{Listable, Reflector, ReflectorConfig};
pub use template::{LauncherTemplateService, TemplateService, VmService};
pub use workqueue::{ItemExponentialFailureRateLimiter, RateLimiter, RateLimitingQueue, WorkQueue};
