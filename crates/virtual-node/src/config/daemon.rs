use std::path::PathBuf;
use std::time::Duration;

use api_types::SearchCriteria;
use clap::Parser;
use marketplace::config::DEFAULT_BASE_URL;
use marketplace::MarketplaceConfig;

use crate::endpoints;
use crate::provider::NodeConfig;
use crate::scheduler::SchedulerPolicy;

#[derive(Parser, Clone)]
pub struct MarketplaceArgs {
    #[arg(
        long,
        env = "MARKETPLACE_API_KEY",
        hide_env_values = true,
        help = "API key for the GPU marketplace"
    )]
    pub api_key: String,

    #[arg(
        long,
        env = "MARKETPLACE_URL",
        default_value = DEFAULT_BASE_URL,
        help = "Base URL of the marketplace REST API"
    )]
    pub marketplace_url: String,
}

#[derive(Parser, Clone)]
pub struct CheckConnectionArgs {
    #[command(flatten)]
    pub marketplace: MarketplaceArgs,
}

#[derive(Parser, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub marketplace: MarketplaceArgs,

    #[arg(
        long,
        env = "VNODE_NODE_NAME",
        help = "Name of the virtual node registered in the cluster"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "VNODE_WORKLOAD_IMAGE",
        help = "Image to run when a pod container does not name one"
    )]
    pub workload_image: Option<String>,

    #[arg(long, default_value = "40", help = "Disk size in GB requested for every instance")]
    pub disk_gb: f64,

    #[arg(
        long,
        default_value = "/health",
        help = "HTTP path probed on every exposed port before a pod is ready"
    )]
    pub health_path: String,

    #[arg(long, default_value = "15", help = "Seconds between instance status polls")]
    pub poll_interval_secs: u64,

    #[arg(
        long,
        default_value = "600",
        help = "Seconds an instance may take to become ready before it is abandoned"
    )]
    pub ready_timeout_secs: u64,

    #[arg(long, default_value = "30", help = "Seconds between node status updates")]
    pub heartbeat_interval_secs: u64,

    #[arg(
        long,
        default_value = "30",
        help = "Seconds between pod status reconciliations"
    )]
    pub sweep_interval_secs: u64,

    #[arg(long, default_value = "0.5", help = "Default hourly price ceiling in dollars")]
    pub default_max_price: f64,

    #[arg(long, default_value = "16", help = "Default minimum memory per GPU in GB")]
    pub default_min_gpu_memory_gb: u64,

    #[arg(long, default_value = "0.9", help = "Default minimum host reliability")]
    pub default_min_reliability: f64,

    #[arg(
        long,
        default_value = "100",
        help = "Default minimum upload and download bandwidth in Mbps"
    )]
    pub default_min_bandwidth_mbps: f64,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Preferred regions in order, e.g. US,CA,NO"
    )]
    pub preferred_regions: Vec<String>,

    #[arg(long, default_value = "64", help = "CPU capacity advertised by the node")]
    pub node_cpu: String,

    #[arg(long, default_value = "512Gi", help = "Memory capacity advertised by the node")]
    pub node_memory: String,

    #[arg(long, default_value = "100", help = "Pod capacity advertised by the node")]
    pub node_pods: String,

    #[arg(long, default_value = "8", help = "GPU capacity advertised by the node")]
    pub node_gpus: String,
}

impl MarketplaceArgs {
    pub fn marketplace_config(&self) -> MarketplaceConfig {
        MarketplaceConfig::new(self.api_key.clone()).with_base_url(self.marketplace_url.clone())
    }
}

impl DaemonArgs {
    pub fn marketplace_config(&self) -> MarketplaceConfig {
        self.marketplace
            .marketplace_config()
            .with_readiness(
                Duration::from_secs(self.poll_interval_secs),
                Duration::from_secs(self.ready_timeout_secs),
            )
            .with_health_check(self.health_path.clone(), Duration::from_secs(5))
    }

    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        let defaults = SearchCriteria {
            min_gpu_ram_mb: self.default_min_gpu_memory_gb * 1024,
            max_price_per_hour: self.default_max_price,
            min_reliability: self.default_min_reliability,
            min_inet_up_mbps: self.default_min_bandwidth_mbps,
            min_inet_down_mbps: self.default_min_bandwidth_mbps,
            preferred_regions: self.preferred_regions.clone(),
            ..SearchCriteria::default()
        };
        SchedulerPolicy::default()
            .with_defaults(defaults)
            .with_workload_image(self.workload_image.clone())
            .with_disk_gb(self.disk_gb)
            .with_default_ports(endpoints::managed_ports())
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_name: self.node_name.clone(),
            cpu: self.node_cpu.clone(),
            memory: self.node_memory.clone(),
            pods: self.node_pods.clone(),
            gpus: self.node_gpus.clone(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
