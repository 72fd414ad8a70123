use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::k8s::KubernetesError;
use crate::provider::NodeStatusSink;
use crate::provider::PodNotifier;

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// Writes synthesized pod status to the `status` subresource.
pub struct KubePodNotifier {
    client: Client,
}

impl KubePodNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodNotifier for KubePodNotifier {
    async fn notify(&self, pod: Pod) -> Result<(), Report<KubernetesError>> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "status": pod.status });

        match api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // The pod was removed while its status was in flight.
            Err(e) if is_not_found(&e) => {
                debug!(pod = %name, namespace = %namespace, "Pod gone before status update");
                Ok(())
            }
            Err(e) => Err(Report::new(e).change_context(KubernetesError::RequestFailed {
                message: format!("Failed to patch status of pod {namespace}/{name}"),
            })),
        }
    }
}

/// Registers the virtual node and refreshes its status.
pub struct KubeNodeSink {
    client: Client,
}

impl KubeNodeSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeStatusSink for KubeNodeSink {
    async fn update_node(&self, node: Node) -> Result<(), Report<KubernetesError>> {
        let name = node.metadata.name.clone().unwrap_or_default();
        let api: Api<Node> = Api::all(self.client.clone());

        let existing = api
            .get_opt(&name)
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to read node {name}"),
            })?;

        if existing.is_none() {
            api.create(&PostParams::default(), &node)
                .await
                .change_context(KubernetesError::RequestFailed {
                    message: format!("Failed to register node {name}"),
                })?;
            debug!(node = %name, "Registered virtual node");
        }

        let patch = json!({ "status": node.status });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .change_context(KubernetesError::RequestFailed {
                message: format!("Failed to update status of node {name}"),
            })?;
        Ok(())
    }
}
