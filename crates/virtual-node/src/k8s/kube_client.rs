use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::k8s::KubernetesError;

/// Build a client from an explicit kubeconfig, or infer one from the
/// environment (in-cluster service account, then `~/.kube/config`).
pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
) -> Result<Client, Report<KubernetesError>> {
    let config = match kubeconfig.as_deref() {
        Some(path) => config_from_file(path).await?,
        None => Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "No in-cluster or local kubeconfig found".to_string(),
            })?,
    };
    tracing::debug!(cluster_url = %config.cluster_url, "Kubernetes config loaded");

    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })
}

async fn config_from_file(path: &Path) -> Result<Config, Report<KubernetesError>> {
    let kubeconfig =
        Kubeconfig::read_from(path).change_context(KubernetesError::ConnectionFailed {
            message: format!("Failed to read kubeconfig file: {}", path.display()),
        })?;

    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(KubernetesError::ConnectionFailed {
            message: format!("Invalid kubeconfig: {}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubeconfig_is_a_connection_error() {
        let Err(err) = init_kube_client(Some(PathBuf::from("/nonexistent/kubeconfig"))).await
        else {
            panic!("a missing kubeconfig must be rejected");
        };
        assert!(matches!(
            err.current_context(),
            KubernetesError::ConnectionFailed { message } if message.contains("/nonexistent/kubeconfig")
        ));
    }
}
