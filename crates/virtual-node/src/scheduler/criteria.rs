//! Derivation of marketplace search criteria and workloads from pods.

use std::collections::BTreeMap;

use api_types::SearchCriteria;
use api_types::WorkloadSpec;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;

use crate::k8s::MarketplaceAnnotations;
use crate::scheduler::SchedulerError;

/// Extended resource name used for GPU requests.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

const DEFAULT_DISK_GB: f64 = 40.0;

/// Node-wide defaults applied to every pod that does not override them.
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    pub defaults: SearchCriteria,
    /// Image used when the pod does not name one
    pub workload_image: Option<String>,
    pub disk_gb: f64,
    /// Ports exposed when the pod declares none
    pub default_ports: Vec<u16>,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            defaults: SearchCriteria::default(),
            workload_image: None,
            disk_gb: DEFAULT_DISK_GB,
            default_ports: Vec::new(),
        }
    }
}

impl SchedulerPolicy {
    pub fn with_defaults(mut self, defaults: SearchCriteria) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_workload_image(mut self, image: Option<String>) -> Self {
        self.workload_image = image.filter(|image| !image.trim().is_empty());
        self
    }

    pub fn with_disk_gb(mut self, disk_gb: f64) -> Self {
        self.disk_gb = disk_gb;
        self
    }

    pub fn with_default_ports(mut self, ports: Vec<u16>) -> Self {
        self.default_ports = ports;
        self
    }
}

/// Build search criteria for a pod from its annotations and GPU request.
///
/// # Errors
///
/// - [`SchedulerError::InvalidPodSpec`] if an annotation or the GPU quantity is malformed
pub fn criteria_for_pod(
    pod: &Pod,
    defaults: &SearchCriteria,
) -> Result<SearchCriteria, Report<SchedulerError>> {
    let raw = pod.metadata.annotations.clone().unwrap_or_default();
    let annotations = MarketplaceAnnotations::from_pod_annotations(&raw)
        .change_context(invalid(pod, "malformed scheduling annotations"))?;

    let mut criteria = defaults.clone();
    if let Some(gpu_type) = annotations.gpu_type {
        criteria.gpu_name = Some(gpu_type);
    }
    if let Some(bytes) = annotations.min_gpu_memory {
        criteria.min_gpu_ram_mb = bytes / (1024 * 1024);
    }
    if let Some(max_price) = annotations.max_price {
        criteria.max_price_per_hour = max_price;
    }
    if let Some(min_reliability) = annotations.min_reliability {
        criteria.min_reliability = min_reliability;
    }
    if let Some(bandwidth) = annotations.min_bandwidth_mbps {
        criteria.min_inet_up_mbps = bandwidth;
        criteria.min_inet_down_mbps = bandwidth;
    }
    if let Some(regions) = annotations.regions {
        criteria.preferred_regions = regions;
    }

    let gpus = requested_gpus(pod)?;
    if gpus > 0 {
        criteria.num_gpus = gpus;
    }

    Ok(criteria)
}

/// Total GPUs asked for by the pod's containers, limits taking precedence.
fn requested_gpus(pod: &Pod) -> Result<u32, Report<SchedulerError>> {
    let mut total = 0u32;
    for container in containers(pod) {
        let Some(resources) = &container.resources else {
            continue;
        };
        let quantity = resources
            .limits
            .as_ref()
            .and_then(|limits| limits.get(GPU_RESOURCE))
            .or_else(|| {
                resources
                    .requests
                    .as_ref()
                    .and_then(|requests| requests.get(GPU_RESOURCE))
            });
        if let Some(quantity) = quantity {
            let count = quantity.0.trim().parse::<u32>().map_err(|_| {
                Report::new(invalid(
                    pod,
                    &format!("invalid {GPU_RESOURCE} quantity {:?}", quantity.0),
                ))
            })?;
            total = total.saturating_add(count);
        }
    }
    Ok(total)
}

/// Project a pod onto the marketplace workload it should run.
///
/// # Errors
///
/// - [`SchedulerError::InvalidPodSpec`] if the pod has no name or no image can be resolved
pub fn workload_for_pod(
    pod: &Pod,
    policy: &SchedulerPolicy,
) -> Result<WorkloadSpec, Report<SchedulerError>> {
    let pod_name = pod
        .metadata
        .name
        .clone()
        .ok_or_else(|| Report::new(invalid(pod, "pod has no name")))?;
    let namespace = pod
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());

    let container = containers(pod).first();
    let image = container
        .and_then(|c| c.image.clone())
        .filter(|image| !image.trim().is_empty())
        .or_else(|| policy.workload_image.clone())
        .ok_or_else(|| Report::new(invalid(pod, "no container image and no default image")))?;

    let command: Vec<String> = container
        .map(|c| {
            c.command
                .iter()
                .flatten()
                .chain(c.args.iter().flatten())
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let env: BTreeMap<String, String> = container
        .and_then(|c| c.env.as_ref())
        .map(|vars| {
            vars.iter()
                .filter_map(|var| var.value.clone().map(|value| (var.name.clone(), value)))
                .collect()
        })
        .unwrap_or_default();

    let mut ports: Vec<u16> = containers(pod)
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .filter_map(|p| u16::try_from(p.container_port).ok())
        .collect();
    if ports.is_empty() {
        ports = policy.default_ports.clone();
    }
    ports.sort_unstable();
    ports.dedup();

    let raw = pod.metadata.annotations.clone().unwrap_or_default();
    let disk_gb = MarketplaceAnnotations::from_pod_annotations(&raw)
        .change_context(invalid(pod, "malformed scheduling annotations"))?
        .disk_gb
        .unwrap_or(policy.disk_gb);

    Ok(WorkloadSpec {
        label: Some(format!("{namespace}/{pod_name}")),
        pod_name,
        namespace,
        image,
        command,
        env,
        ports,
        disk_gb,
    })
}

fn containers(pod: &Pod) -> &[Container] {
    pod.spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default()
}

fn invalid(pod: &Pod, message: &str) -> SchedulerError {
    SchedulerError::InvalidPodSpec {
        pod: pod.metadata.name.clone().unwrap_or_default(),
        message: message.to_string(),
    }
}
