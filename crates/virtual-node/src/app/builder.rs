use std::sync::Arc;

use anyhow::Result;
use marketplace::Marketplace;
use marketplace::MarketplaceClient;

use crate::app::core::Application;
use crate::app::services::ApplicationServices;
use crate::config::DaemonArgs;
use crate::endpoints::KubeEndpointStore;
use crate::k8s::init_kube_client;
use crate::k8s::KubeNodeSink;
use crate::k8s::KubePodNotifier;
use crate::k8s::PodWatcher;
use crate::provider::NodeProvider;
use crate::provider::PodLifecycleHandler;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Connect to the marketplace and the cluster, then assemble the services.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");
        let args = &self.daemon_args;

        let marketplace = MarketplaceClient::new(args.marketplace_config())
            .map_err(|e| anyhow::anyhow!("Failed to create marketplace client: {e:?}"))?;
        marketplace
            .test_connection()
            .await
            .map_err(|e| anyhow::anyhow!("Marketplace connection test failed: {e:?}"))?;
        tracing::info!(url = %args.marketplace.marketplace_url, "Marketplace connection verified");

        let client = init_kube_client(args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let provider = Arc::new(NodeProvider::new(
            args.node_config(),
            Arc::new(marketplace),
            args.scheduler_policy(),
            Arc::new(KubeEndpointStore::new(client.clone())),
        ));
        let notifier = Arc::new(KubePodNotifier::new(client.clone()));
        provider.notify_pods(notifier.clone()).await;

        let handler: Arc<dyn PodLifecycleHandler> = provider.clone();
        let pod_watcher = Arc::new(PodWatcher::new(
            client.clone(),
            args.node_name.clone(),
            handler,
            notifier,
        ));

        let services = ApplicationServices {
            provider,
            node_sink: Arc::new(KubeNodeSink::new(client)),
            pod_watcher,
        };
        Ok(Application::new(services, self.daemon_args))
    }
}
