use std::sync::Arc;

use crate::k8s::PodWatcher;
use crate::provider::NodeProvider;
use crate::provider::NodeStatusSink;

/// Long-lived services shared by the background tasks
pub struct ApplicationServices {
    pub provider: Arc<NodeProvider>,
    pub node_sink: Arc<dyn NodeStatusSink>,
    pub pod_watcher: Arc<PodWatcher>,
}
