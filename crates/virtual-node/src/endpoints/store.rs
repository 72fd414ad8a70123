use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Endpoints;
use kube::api::PostParams;
use kube::Api;
use kube::Client;

use crate::endpoints::EndpointError;

/// Read/write access to `Endpoints` objects.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, Report<EndpointError>>;

    async fn create(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>>;

    /// Replace an existing object; `endpoints` carries the fetched resource version.
    async fn replace(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>>;
}

/// [`EndpointStore`] backed by the Kubernetes API.
pub struct KubeEndpointStore {
    client: Client,
}

impl KubeEndpointStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn name_of(endpoints: &Endpoints) -> Result<&str, Report<EndpointError>> {
    endpoints.metadata.name.as_deref().ok_or_else(|| {
        Report::new(EndpointError::Kubernetes {
            message: "endpoints object without a name".to_string(),
        })
    })
}

#[async_trait]
impl EndpointStore for KubeEndpointStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, Report<EndpointError>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .change_context(EndpointError::Kubernetes {
                message: format!("failed to read endpoints {namespace}/{name}"),
            })
    }

    async fn create(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        let name = name_of(endpoints)?;
        self.api(namespace)
            .create(&PostParams::default(), endpoints)
            .await
            .change_context(EndpointError::Kubernetes {
                message: format!("failed to create endpoints {namespace}/{name}"),
            })?;
        Ok(())
    }

    async fn replace(
        &self,
        namespace: &str,
        endpoints: &Endpoints,
    ) -> Result<(), Report<EndpointError>> {
        let name = name_of(endpoints)?;
        self.api(namespace)
            .replace(name, &PostParams::default(), endpoints)
            .await
            .change_context(EndpointError::Kubernetes {
                message: format!("failed to replace endpoints {namespace}/{name}"),
            })?;
        Ok(())
    }
}
