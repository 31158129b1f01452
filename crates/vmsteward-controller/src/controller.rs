use crate::cache::Informer;
use crate::error::{ControllerError, Result};
use crate::expectations::{ControllerExpectations, UidTrackingExpectations, DEFAULT_EXPECTATIONS_TIMEOUT};
use crate::handlers::{PodEventHandler, VmEventHandler};
use crate::matcher::{filter_matching_pods, is_pod_owned_by_handler};
use crate::recorder::EventRecorder;
use crate::status::update_status;
use crate::sync::SyncEngine;
use crate::template::{TemplateService, VmService};
use crate::traits::ClusterClient;
use crate::workqueue::{RateLimitingQueue, WorkQueue};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vmsteward_core::{Resource, VirtualMachine};

/// Configuration for the VirtualMachine controller
#[derive(Debug, Clone)]
pub struct VmControllerConfig {
    /// Number of concurrent reconcile loops
    pub workers: usize,
    /// Age after which unobserved expectations stop blocking syncs
    pub expectations_timeout: Duration,
    /// First retry delay of a failing key
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
}

impl Default for VmControllerConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            expectations_timeout: DEFAULT_EXPECTATIONS_TIMEOUT,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
        }
    }
}

/// Reconciles VirtualMachines against their launcher pods
pub struct VmController {
    queue: Arc<dyn WorkQueue>,
    vm_informer: Arc<Informer<VirtualMachine>>,
    pod_informer: Arc<Informer<Pod>>,
    client: Arc<dyn ClusterClient>,
    pod_expectations: Arc<UidTrackingExpectations>,
    handover_expectations: Arc<UidTrackingExpectations>,
    sync_engine: SyncEngine,
    config: VmControllerConfig,
}

impl VmController {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        template: Arc<dyn TemplateService>,
        recorder: Arc<dyn EventRecorder>,
        vm_informer: Arc<Informer<VirtualMachine>>,
        pod_informer: Arc<Informer<Pod>>,
        config: VmControllerConfig,
    ) -> Self {
        let queue = Arc::new(RateLimitingQueue::with_backoff(
            config.backoff_base,
            config.backoff_max,
        ));
        Self::with_queue(
            client,
            template,
            recorder,
            vm_informer,
            pod_informer,
            queue,
            config,
        )
    }

    /// Build a controller around an existing work queue
    pub fn with_queue(
        client: Arc<dyn ClusterClient>,
        template: Arc<dyn TemplateService>,
        recorder: Arc<dyn EventRecorder>,
        vm_informer: Arc<Informer<VirtualMachine>>,
        pod_informer: Arc<Informer<Pod>>,
        queue: Arc<dyn WorkQueue>,
        config: VmControllerConfig,
    ) -> Self {
        let pod_expectations = Arc::new(UidTrackingExpectations::new(
            ControllerExpectations::with_timeout(config.expectations_timeout),
        ));
        let handover_expectations = Arc::new(UidTrackingExpectations::new(
            ControllerExpectations::with_timeout(config.expectations_timeout),
        ));

        vm_informer.add_event_handler(Arc::new(VmEventHandler::new(queue.clone())));
        pod_informer.add_event_handler(Arc::new(PodEventHandler::new(
            queue.clone(),
            vm_informer.clone(),
            pod_expectations.clone(),
        )));

        let sync_engine = SyncEngine::new(
            client.clone(),
            VmService::new(client.clone(), template),
            recorder,
            pod_expectations.clone(),
            handover_expectations.clone(),
        );

        Self {
            queue,
            vm_informer,
            pod_informer,
            client,
            pod_expectations,
            handover_expectations,
            sync_engine,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn pod_expectations(&self) -> &UidTrackingExpectations {
        &self.pod_expectations
    }

    pub fn handover_expectations(&self) -> &UidTrackingExpectations {
        &self.handover_expectations
    }

    /// Start the workers and block until `token` is cancelled.
    ///
    /// Workers start only once both caches have synced. On cancellation the
    /// queue is shut down and every worker finishes its current pass.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!("Starting VM controller");

        if !self.wait_for_cache_sync(&token).await {
            info!("VM controller stopped before caches synced");
            self.queue.shut_down();
            return;
        }

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    debug!("VM controller worker {} started", id);
                    while controller.process_next_work_item().await {}
                    debug!("VM controller worker {} stopped", id);
                })
            })
            .collect();

        token.cancelled().await;
        info!("Stopping VM controller");
        self.queue.shut_down();

        for worker in workers {
            if let Err(e) = worker.await {
                error!("VM controller worker failed: {}", e);
            }
        }
    }

    async fn wait_for_cache_sync(&self, token: &CancellationToken) -> bool {
        self.vm_informer.wait_for_sync(token).await && self.pod_informer.wait_for_sync(token).await
    }

    /// Run one reconcile pass for the next key. Returns false once the
    /// queue is shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.execute(&key).await {
            Ok(()) => {
                debug!("Processed VM {}", key);
                self.queue.forget(&key);
            }
            Err(e) => {
                info!("Re-enqueuing VM {}: {}", key, e);
                self.queue.add_rate_limited(&key);
            }
        }
        self.queue.done(&key);
        true
    }

    /// Reconcile the VM stored under `key`
    pub async fn execute(&self, key: &str) -> Result<()> {
        let Some(vm) = self.vm_informer.store().get_by_key(key) else {
            // The VM is gone for good once its finalizers are removed
            self.pod_expectations.delete_expectations(key);
            self.handover_expectations.delete_expectations(key);
            return Ok(());
        };

        if !vm.is_initialized() {
            debug!("VM {} is not initialized yet", key);
            return Ok(());
        }

        let pods = filter_matching_pods(&vm, self.pod_informer.store().by_namespace(vm.namespace()));

        if pods.len() > 1 {
            let anomaly = ControllerError::multiple_pods(key, pods.len());
            error!("VM {}: {}, will not requeue", key, anomaly);
            return Ok(());
        }
        if let [pod] = pods.as_slice() {
            if is_pod_owned_by_handler(pod) {
                self.handover_expectations.creation_observed(key);
            }
        }

        // With all expectations met the cache reflects our own writes and it
        // is known who owns the pod
        let needs_sync = self.pod_expectations.satisfied_expectations(key)
            && self.handover_expectations.satisfied_expectations(key);

        let sync_err = if needs_sync {
            self.sync_engine.sync(&vm, &pods).await.err()
        } else {
            debug!("VM {} is waiting on expectations", key);
            None
        };

        update_status(self.client.as_ref(), &vm, &pods, sync_err.as_ref()).await?;

        match sync_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
