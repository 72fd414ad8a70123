//! Node provider.
//!
//! Implements the pod lifecycle on top of marketplace instances: every pod
//! bound to this node is backed by exactly one rented instance. The provider
//! owns the pod -> instance binding table and runs the node heartbeat and the
//! pod status sweep.

pub mod handler;
mod loops;
pub mod node;
pub mod state;
pub mod stats;
pub mod status;

use core::error::Error;
use std::sync::Arc;

use api_types::Instance;
use api_types::InstanceStatus;
use async_trait::async_trait;
use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus;
use marketplace::Marketplace;
use marketplace::MarketplaceError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use handler::LogOptions;
pub use handler::NodeStatusSink;
pub use handler::PodLifecycleHandler;
pub use handler::PodNotifier;
pub use node::NodeConfig;
pub use state::Binding;
pub use stats::StatsSummary;

use crate::endpoints::EndpointStore;
use crate::endpoints::EndpointSynchronizer;
use crate::provider::state::pod_key;
use crate::provider::state::ProviderState;
use crate::scheduler::workload_for_pod;
use crate::scheduler::InstanceScheduler;
use crate::scheduler::SchedulerPolicy;

pub type ProviderResult<T> = Result<T, Report<ProviderError>>;

#[derive(Debug, derive_more::Display)]
pub enum ProviderError {
    #[display("Pod {pod} already has an instance or one is being provisioned")]
    AlreadyExists { pod: String },
    #[display("Pod {pod} is not known to this node")]
    NotFound { pod: String },
    #[display("Unsupported operation: {message}")]
    Unsupported { message: String },
    #[display("Failed to schedule pod {pod}")]
    Scheduling { pod: String },
    #[display("Marketplace request failed: {message}")]
    Marketplace { message: String },
    #[display("Provisioning of pod {pod} was cancelled")]
    Cancelled { pod: String },
    #[display("Invalid pod: {message}")]
    InvalidPod { message: String },
}

impl Error for ProviderError {}

const GONE_MESSAGE: &str = "instance no longer exists at the marketplace";

/// Virtual node backed by rented marketplace instances.
pub struct NodeProvider {
    node: NodeConfig,
    marketplace: Arc<dyn Marketplace>,
    scheduler: InstanceScheduler,
    endpoints: EndpointSynchronizer,
    state: RwLock<ProviderState>,
    notifier: RwLock<Option<Arc<dyn PodNotifier>>>,
}

impl NodeProvider {
    pub fn new(
        node: NodeConfig,
        marketplace: Arc<dyn Marketplace>,
        policy: SchedulerPolicy,
        endpoint_store: Arc<dyn EndpointStore>,
    ) -> Self {
        Self {
            node,
            scheduler: InstanceScheduler::new(marketplace.clone(), policy),
            marketplace,
            endpoints: EndpointSynchronizer::new(endpoint_store),
            state: RwLock::new(ProviderState::default()),
            notifier: RwLock::new(None),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node.node_name
    }

    /// Current node object as advertised by the heartbeat.
    pub fn node_status(&self) -> Node {
        node::build_node(&self.node, Utc::now())
    }

    /// Number of pods with a live binding.
    pub async fn bound_pods(&self) -> usize {
        self.state.read().await.bindings.len()
    }

    async fn binding(&self, key: &str) -> Option<Binding> {
        self.state.read().await.bindings.get(key).cloned()
    }

    async fn notify(&self, pod: Pod) {
        let notifier = self.notifier.read().await.clone();
        let Some(notifier) = notifier else {
            return;
        };
        if let Err(e) = notifier.notify(pod).await {
            warn!("Failed to push pod status: {e:?}");
        }
    }

    async fn destroy_or_orphan(&self, instance_id: u64) {
        if let Err(e) = self.marketplace.destroy_instance(instance_id).await {
            warn!(instance_id, "Failed to destroy instance, queued for retry: {e:?}");
            self.state.write().await.queue_orphan(instance_id);
        }
    }

    /// Point the managed services at the instance and record the outcome.
    ///
    /// The write is only kept while the binding still refers to `instance`.
    /// A pod deleted during the write has its endpoints cleared again, and a
    /// binding replaced meanwhile is left for the sweep to re-sync.
    async fn sync_endpoints(&self, key: &str, pod: &Pod, instance: &Instance) -> bool {
        let current = self
            .binding(key)
            .await
            .is_some_and(|binding| binding.instance.id == instance.id);
        if !current {
            debug!(pod = %key, instance_id = instance.id, "Binding changed, skipping endpoint sync");
            return false;
        }

        let result = self.endpoints.update_pod_endpoints(pod, instance).await;
        if let Err(e) = &result {
            warn!(pod = %key, instance_id = instance.id, "Endpoint sync failed, will retry: {e:?}");
        }

        let still_bound = {
            let mut state = self.state.write().await;
            match state.bindings.get_mut(key) {
                Some(binding) if binding.instance.id == instance.id => {
                    if result.is_ok() {
                        binding.endpoints_synced = true;
                    }
                    return result.is_ok();
                }
                Some(binding) => {
                    binding.endpoints_synced = false;
                    true
                }
                None => false,
            }
        };

        if !still_bound {
            info!(pod = %key, instance_id = instance.id, "Pod deleted during endpoint sync, clearing endpoints");
            if let Err(e) = self.endpoints.cleanup_pod_endpoints(pod).await {
                warn!(pod = %key, "Failed to clear endpoints of deleted pod: {e:?}");
            }
        }
        false
    }

    /// Re-read the instance behind a binding and store the result.
    ///
    /// Transient vendor failures keep the last known instance. Returns `None`
    /// when the binding was removed or replaced while the vendor was queried.
    async fn refresh(&self, key: &str, binding: Binding) -> Option<Binding> {
        let instance_id = binding.instance.id;
        let fetched = match self.marketplace.get_instance(instance_id).await {
            Ok(instance) => Some(instance),
            Err(report) if matches!(report.current_context(), MarketplaceError::NotFound { .. }) => {
                let mut gone = binding.instance.clone();
                gone.status = InstanceStatus::Failed;
                gone.status_message = Some(GONE_MESSAGE.to_string());
                Some(gone)
            }
            Err(report) => {
                warn!(pod = %key, instance_id, "Using last known instance state: {report:?}");
                None
            }
        };

        let mut state = self.state.write().await;
        let stored = state
            .bindings
            .get_mut(key)
            .filter(|stored| stored.instance.id == instance_id)?;
        if let Some(instance) = fetched {
            stored.instance = instance;
        }
        Some(stored.clone())
    }
}

fn key_of(pod: &Pod) -> ProviderResult<String> {
    let name = pod.metadata.name.as_deref().ok_or_else(|| {
        Report::new(ProviderError::InvalidPod {
            message: "pod has no name".to_string(),
        })
    })?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    Ok(pod_key(namespace, name))
}

fn tail(logs: String, lines: Option<usize>) -> String {
    let Some(lines) = lines else {
        return logs;
    };
    let all: Vec<&str> = logs.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut tailed = all[start..].join("\n");
    if !tailed.is_empty() {
        tailed.push('\n');
    }
    tailed
}

#[async_trait]
impl PodLifecycleHandler for NodeProvider {
    #[tracing::instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    async fn create_pod(&self, pod: Pod) -> ProviderResult<()> {
        let key = key_of(&pod)?;

        // reserve the name before any network call so racing creates fail fast
        let token = {
            let mut state = self.state.write().await;
            if state.is_known(&key) {
                return Err(Report::new(ProviderError::AlreadyExists { pod: key }));
            }
            let token = CancellationToken::new();
            state.provisioning.insert(key.clone(), token.clone());
            token
        };
        info!(pod = %key, "Provisioning instance for pod");

        let launched = self
            .scheduler
            .select_and_launch_instance(&pod, token.clone())
            .await;

        let revoked = {
            let mut state = self.state.write().await;
            state.provisioning.remove(&key);
            match &launched {
                Ok(instance) if !token.is_cancelled() => {
                    state
                        .bindings
                        .insert(key.clone(), Binding::new(pod.clone(), instance.clone()));
                    false
                }
                _ => token.is_cancelled(),
            }
        };

        let instance = match launched {
            Ok(instance) if revoked => {
                warn!(pod = %key, instance_id = instance.id, "Pod deleted while provisioning, destroying instance");
                self.destroy_or_orphan(instance.id).await;
                return Err(Report::new(ProviderError::Cancelled { pod: key }));
            }
            Ok(instance) => instance,
            Err(report) if revoked => {
                return Err(report.change_context(ProviderError::Cancelled { pod: key }));
            }
            Err(report) => {
                return Err(report.change_context(ProviderError::Scheduling { pod: key }));
            }
        };
        info!(
            pod = %key,
            instance_id = instance.id,
            public_ip = ?instance.public_ip,
            "Pod bound to instance"
        );

        self.sync_endpoints(&key, &pod, &instance).await;
        if let Some(binding) = self.binding(&key).await {
            self.notify(status::pod_with_status(&binding)).await;
        }
        Ok(())
    }

    async fn update_pod(&self, pod: Pod) -> ProviderResult<()> {
        let key = key_of(&pod)?;
        let instance_id = self
            .binding(&key)
            .await
            .map(|binding| binding.instance.id)
            .ok_or_else(|| Report::new(ProviderError::NotFound { pod: key.clone() }))?;

        let workload = workload_for_pod(&pod, self.scheduler.policy()).change_context(
            ProviderError::InvalidPod {
                message: format!("pod {key} cannot be translated into a workload"),
            },
        )?;

        match self.marketplace.update_instance(instance_id, &workload).await {
            Ok(instance) => {
                let mut state = self.state.write().await;
                if let Some(binding) = state.bindings.get_mut(&key) {
                    binding.pod = pod;
                    binding.instance = instance;
                }
                Ok(())
            }
            Err(report) => {
                let context = match report.current_context() {
                    MarketplaceError::Unsupported { .. } => ProviderError::Unsupported {
                        message: "instances cannot be updated in place, recreate the pod".into(),
                    },
                    other => ProviderError::Marketplace {
                        message: other.to_string(),
                    },
                };
                Err(report.change_context(context))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    async fn delete_pod(&self, pod: Pod) -> ProviderResult<()> {
        let key = key_of(&pod)?;

        let binding = {
            let mut state = self.state.write().await;
            if let Some(token) = state.provisioning.get(&key) {
                info!(pod = %key, "Pod deleted while provisioning, cancelling");
                token.cancel();
                return Ok(());
            }
            state.bindings.remove(&key)
        };
        let Some(binding) = binding else {
            debug!(pod = %key, "Pod has no instance, nothing to delete");
            return Ok(());
        };

        self.destroy_or_orphan(binding.instance.id).await;
        if let Err(e) = self.endpoints.cleanup_pod_endpoints(&binding.pod).await {
            warn!(pod = %key, "Failed to clean up endpoints: {e:?}");
        }
        info!(pod = %key, instance_id = binding.instance.id, "Pod deleted");
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> ProviderResult<Option<Pod>> {
        let key = pod_key(namespace, name);
        let Some(binding) = self.binding(&key).await else {
            return Ok(None);
        };
        Ok(self
            .refresh(&key, binding)
            .await
            .map(|binding| status::pod_with_status(&binding)))
    }

    async fn get_pod_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> ProviderResult<Option<PodStatus>> {
        Ok(self
            .get_pod(namespace, name)
            .await?
            .and_then(|pod| pod.status))
    }

    async fn get_pods(&self) -> ProviderResult<Vec<Pod>> {
        let snapshot: Vec<(String, Binding)> = self
            .state
            .read()
            .await
            .bindings
            .iter()
            .map(|(key, binding)| (key.clone(), binding.clone()))
            .collect();

        let refreshed = futures::future::join_all(
            snapshot
                .into_iter()
                .map(|(key, binding)| async move { self.refresh(&key, binding).await }),
        )
        .await;

        Ok(refreshed.iter().flatten().map(status::pod_with_status).collect())
    }

    async fn get_pod_logs(
        &self,
        namespace: &str,
        name: &str,
        _container: &str,
        options: &LogOptions,
    ) -> ProviderResult<String> {
        let key = pod_key(namespace, name);
        let binding = self
            .binding(&key)
            .await
            .ok_or_else(|| Report::new(ProviderError::NotFound { pod: key }))?;

        let logs = self
            .marketplace
            .get_instance_logs(binding.instance.id)
            .await;
        Ok(tail(logs, options.tail_lines))
    }

    async fn run_in_container(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        _command: Vec<String>,
    ) -> ProviderResult<()> {
        Err(Report::new(ProviderError::Unsupported {
            message: format!(
                "exec into {namespace}/{name}/{container} is not available on marketplace instances"
            ),
        }))
    }

    async fn get_stats_summary(&self) -> ProviderResult<StatsSummary> {
        let state = self.state.read().await;
        Ok(StatsSummary::collect(
            self.node_name(),
            state.bindings.values(),
            Utc::now(),
        ))
    }

    async fn notify_pods(&self, notifier: Arc<dyn PodNotifier>) {
        *self.notifier.write().await = Some(notifier);
    }
}
