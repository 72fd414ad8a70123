use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::runtime::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::k8s::KubernetesError;
use crate::provider::status;
use crate::provider::PodLifecycleHandler;
use crate::provider::PodNotifier;
use crate::provider::ProviderError;

/// What the watcher does with an observed pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodAction {
    /// Provision an instance for the pod
    Create,
    /// Release the pod's instance and let the apiserver drop the object
    Delete,
    /// Nothing to do, e.g. the pod already finished
    Ignore,
}

impl PodAction {
    pub fn for_pod(pod: &Pod) -> Self {
        if pod.metadata.deletion_timestamp.is_some() {
            return Self::Delete;
        }
        let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
        match phase {
            Some("Succeeded") | Some("Failed") => Self::Ignore,
            _ => Self::Create,
        }
    }
}

/// Watches pods scheduled onto the virtual node and feeds them to the provider.
pub struct PodWatcher {
    client: Client,
    node_name: String,
    handler: Arc<dyn PodLifecycleHandler>,
    notifier: Arc<dyn PodNotifier>,
}

impl PodWatcher {
    pub fn new(
        client: Client,
        node_name: impl Into<String>,
        handler: Arc<dyn PodLifecycleHandler>,
        notifier: Arc<dyn PodNotifier>,
    ) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            handler,
            notifier,
        }
    }

    /// Watch until cancelled, restarting the stream after failures.
    #[tracing::instrument(skip(self, cancellation_token), fields(node = %self.node_name))]
    pub async fn run(
        &self,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting pod watcher");

        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod watcher shutdown requested");
                    break;
                }
                result = self.watch_pods() => {
                    match result {
                        Ok(()) => {
                            warn!("Pod watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Pod watch failed: {e:?}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch_pods(&self) -> Result<(), Report<KubernetesError>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let config = Config::default().fields(&format!("spec.nodeName={}", self.node_name));
        let mut stream = watcher(api, config).boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.handle_event(event).await,
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    pub(crate) async fn handle_event(&self, event: Event<Pod>) {
        match event {
            Event::Applied(pod) => self.handle_applied(pod).await,
            Event::Deleted(pod) => self.release(&pod).await,
            // Pods removed while the watch was down are not reconciled here.
            Event::Restarted(pods) => {
                debug!(pods = pods.len(), "Pod watch (re)listed");
                for pod in pods {
                    self.handle_applied(pod).await;
                }
            }
        }
    }

    async fn handle_applied(&self, pod: Pod) {
        match PodAction::for_pod(&pod) {
            PodAction::Create => self.spawn_create(pod),
            PodAction::Delete => {
                self.release(&pod).await;
                self.force_delete(&pod).await;
            }
            PodAction::Ignore => {}
        }
    }

    async fn release(&self, pod: &Pod) {
        let name = pod.metadata.name.as_deref().unwrap_or("unknown");
        if let Err(e) = self.handler.delete_pod(pod.clone()).await {
            error!(pod = %name, "Failed to delete pod: {e:?}");
        }
    }

    /// Provisioning takes minutes, so it runs off the watch loop.
    fn spawn_create(&self, pod: Pod) {
        let handler = self.handler.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let name = pod.metadata.name.clone().unwrap_or_default();
            let Err(e) = handler.create_pod(pod.clone()).await else {
                return;
            };
            match e.current_context() {
                ProviderError::AlreadyExists { .. } => {
                    debug!(pod = %name, "Pod already handled");
                }
                ProviderError::Cancelled { .. } => {
                    info!(pod = %name, "Pod provisioning cancelled");
                }
                _ => {
                    error!(pod = %name, "Failed to create pod: {e:?}");
                    let failed = status::failed_pod(&pod, "ProviderFailed", &e.to_string());
                    if let Err(e) = notifier.notify(failed).await {
                        warn!(pod = %name, "Failed to report pod failure: {e:?}");
                    }
                }
            }
        });
    }

    /// Remove the pod object once its instance is released.
    async fn force_delete(&self, pod: &Pod) {
        let (Some(name), Some(namespace)) = (&pod.metadata.name, &pod.metadata.namespace) else {
            return;
        };
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => debug!(pod = %name, namespace = %namespace, "Pod object deleted"),
            Err(kube::Error::Api(response)) if response.code == 404 => {}
            Err(e) => warn!(pod = %name, namespace = %namespace, "Failed to delete pod object: {e}"),
        }
    }
}
