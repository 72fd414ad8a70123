use std::collections::HashMap;

use api_types::Instance;
use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;

/// A pod and the instance running it.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Pod as received from the cluster
    pub pod: Pod,
    /// Last known view of the instance
    pub instance: Instance,
    pub created_at: DateTime<Utc>,
    pub endpoints_synced: bool,
}

impl Binding {
    pub fn new(pod: Pod, instance: Instance) -> Self {
        Self {
            pod,
            instance,
            created_at: Utc::now(),
            endpoints_synced: false,
        }
    }
}

/// Everything the provider tracks, guarded by a single lock.
#[derive(Debug, Default)]
pub(crate) struct ProviderState {
    /// `namespace/name` -> binding
    pub bindings: HashMap<String, Binding>,
    /// Pods with a scheduling attempt in flight
    pub provisioning: HashMap<String, CancellationToken>,
    /// Instances whose destroy call failed
    pub orphans: Vec<u64>,
}

impl ProviderState {
    pub fn is_known(&self, key: &str) -> bool {
        self.bindings.contains_key(key) || self.provisioning.contains_key(key)
    }

    pub fn queue_orphan(&mut self, instance_id: u64) {
        if !self.orphans.contains(&instance_id) {
            self.orphans.push(instance_id);
        }
    }
}

/// Key used for the binding table.
pub fn pod_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
