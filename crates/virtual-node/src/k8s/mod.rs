//! Kubernetes integration module.
//!
//! Connects the node provider to the cluster:
//! - [`PodWatcher`]: watches pods bound to this node and drives the provider
//! - [`MarketplaceAnnotations`]: per-pod placement overrides
//! - [`KubePodNotifier`] / [`KubeNodeSink`]: write pod and node status back

pub mod annotations;
pub mod kube_client;
pub mod pod_watcher;
pub mod status_sink;
pub mod types;

pub use annotations::MarketplaceAnnotations;
pub use kube_client::init_kube_client;
pub use pod_watcher::PodAction;
pub use pod_watcher::PodWatcher;
pub use status_sink::KubeNodeSink;
pub use status_sink::KubePodNotifier;
pub use types::KubernetesError;
