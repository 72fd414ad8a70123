use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus;

use crate::k8s::KubernetesError;
use crate::provider::stats::StatsSummary;
use crate::provider::ProviderResult;

/// Options accepted by [`PodLifecycleHandler::get_pod_logs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Only return the last N lines
    pub tail_lines: Option<usize>,
    pub follow: bool,
}

/// Receives pod objects whose status changed.
#[async_trait]
pub trait PodNotifier: Send + Sync {
    async fn notify(&self, pod: Pod) -> Result<(), Report<KubernetesError>>;
}

/// Receives the node object produced by every heartbeat.
#[async_trait]
pub trait NodeStatusSink: Send + Sync {
    async fn update_node(&self, node: Node) -> Result<(), Report<KubernetesError>>;
}

/// Pod lifecycle contract between the node agent and a compute backend.
#[async_trait]
pub trait PodLifecycleHandler: Send + Sync {
    async fn create_pod(&self, pod: Pod) -> ProviderResult<()>;

    async fn update_pod(&self, pod: Pod) -> ProviderResult<()>;

    /// Idempotent: deleting an unknown pod succeeds.
    async fn delete_pod(&self, pod: Pod) -> ProviderResult<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> ProviderResult<Option<Pod>>;

    async fn get_pod_status(&self, namespace: &str, name: &str)
        -> ProviderResult<Option<PodStatus>>;

    async fn get_pods(&self) -> ProviderResult<Vec<Pod>>;

    async fn get_pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        options: &LogOptions,
    ) -> ProviderResult<String>;

    async fn run_in_container(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        command: Vec<String>,
    ) -> ProviderResult<()>;

    async fn get_stats_summary(&self) -> ProviderResult<StatsSummary>;

    /// Register where asynchronous status changes are pushed.
    async fn notify_pods(&self, notifier: Arc<dyn PodNotifier>);
}
