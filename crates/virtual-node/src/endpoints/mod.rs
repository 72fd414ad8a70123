//! Endpoint synchronization.
//!
//! Cluster services for the speech workload have no selector; their
//! `Endpoints` objects are written here so that in-cluster clients reach the
//! rented instance through its public address and the vendor-mapped ports.

pub mod store;

use core::error::Error;
use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::Instance;
use chrono::SecondsFormat;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::EndpointAddress;
use k8s_openapi::api::core::v1::EndpointPort;
use k8s_openapi::api::core::v1::EndpointSubset;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;
use tracing::info;

pub use store::EndpointStore;
pub use store::KubeEndpointStore;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "gpu-virtual-node";
pub const POD_ANNOTATION: &str = "gpu.vnode.io/backing-pod";
pub const INSTANCE_ANNOTATION: &str = "gpu.vnode.io/instance-id";
pub const LAST_UPDATE_ANNOTATION: &str = "gpu.vnode.io/last-update";

/// A selector-less service whose endpoints follow the rented instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedService {
    pub name: &'static str,
    pub port_name: &'static str,
    /// Container port the service expects on the workload
    pub port: u16,
}

pub const MANAGED_SERVICES: &[ManagedService] = &[
    ManagedService {
        name: "speech-api",
        port_name: "http",
        port: 8000,
    },
    ManagedService {
        name: "speech-stream",
        port_name: "ws",
        port: 8765,
    },
];

/// Container ports every workload has to expose for the managed services.
pub fn managed_ports() -> Vec<u16> {
    MANAGED_SERVICES.iter().map(|service| service.port).collect()
}

#[derive(Debug, derive_more::Display)]
pub enum EndpointError {
    #[display("Instance has no external mapping for port {port} of service {service}")]
    PortMappingMissing { service: String, port: u16 },
    #[display("Instance {instance_id} has no public IP")]
    MissingPublicIp { instance_id: u64 },
    #[display("Kubernetes endpoints request failed: {message}")]
    Kubernetes { message: String },
}

impl Error for EndpointError {}

pub struct EndpointSynchronizer {
    store: Arc<dyn EndpointStore>,
}

impl EndpointSynchronizer {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self { store }
    }

    /// Point every managed service at the instance backing `pod`.
    ///
    /// All port mappings are resolved before anything is written, so a
    /// missing mapping leaves the cluster untouched. Repeated calls converge
    /// on the same single-address subset.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::MissingPublicIp`] if the instance has no public IP
    /// - [`EndpointError::PortMappingMissing`] if a managed port is not mapped
    /// - [`EndpointError::Kubernetes`] if reading or writing an object fails
    #[tracing::instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default(), instance_id = instance.id))]
    pub async fn update_pod_endpoints(
        &self,
        pod: &Pod,
        instance: &Instance,
    ) -> Result<(), Report<EndpointError>> {
        let public_ip = instance
            .public_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                Report::new(EndpointError::MissingPublicIp {
                    instance_id: instance.id,
                })
            })?;

        let targets = MANAGED_SERVICES
            .iter()
            .map(|service| {
                instance
                    .external_port(service.port)
                    .map(|external| (service, external))
                    .ok_or_else(|| {
                        Report::new(EndpointError::PortMappingMissing {
                            service: service.name.to_string(),
                            port: service.port,
                        })
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let namespace = pod_namespace(pod);
        let backing_pod = backing_pod(pod);
        for (service, external_port) in targets {
            let existing = self.store.get(namespace, service.name).await?;
            let exists = existing.is_some();

            let mut endpoints = existing.unwrap_or_else(|| Endpoints {
                metadata: ObjectMeta {
                    name: Some(service.name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            });
            endpoints
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
            let annotations = endpoints
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new);
            annotations.insert(POD_ANNOTATION.to_string(), backing_pod.clone());
            annotations.insert(INSTANCE_ANNOTATION.to_string(), instance.id.to_string());
            annotations.insert(LAST_UPDATE_ANNOTATION.to_string(), timestamp());
            endpoints.subsets = Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: public_ip.to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    name: Some(service.port_name.to_string()),
                    port: i32::from(external_port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]);

            if exists {
                self.store.replace(namespace, &endpoints).await?;
            } else {
                self.store.create(namespace, &endpoints).await?;
            }
            debug!(
                service = service.name,
                address = %public_ip,
                external_port,
                "Endpoints updated"
            );
        }

        info!(address = %public_ip, "Managed service endpoints point at instance");
        Ok(())
    }

    /// Empty the subsets of every managed service, keeping the objects.
    ///
    /// # Errors
    ///
    /// - [`EndpointError::Kubernetes`] if reading or writing an object fails
    #[tracing::instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn cleanup_pod_endpoints(&self, pod: &Pod) -> Result<(), Report<EndpointError>> {
        let namespace = pod_namespace(pod);
        for service in MANAGED_SERVICES {
            let Some(mut endpoints) = self.store.get(namespace, service.name).await? else {
                continue;
            };
            endpoints.subsets = Some(Vec::new());
            let annotations = endpoints
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new);
            annotations.remove(INSTANCE_ANNOTATION);
            annotations.remove(POD_ANNOTATION);
            annotations.insert(LAST_UPDATE_ANNOTATION.to_string(), timestamp());
            self.store.replace(namespace, &endpoints).await?;
            debug!(service = service.name, "Endpoints cleared");
        }
        Ok(())
    }
}

fn pod_namespace(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or("default")
}

fn backing_pod(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod_namespace(pod),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
