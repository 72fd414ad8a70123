use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::provider::state::Binding;

/// Per-pod usage of a rented instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStats {
    pub namespace: String,
    pub name: String,
    pub instance_id: u64,
    pub gpu_name: String,
    pub num_gpus: u32,
    pub hourly_price: f64,
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub node_name: String,
    pub collected_at: DateTime<Utc>,
    pub pods: Vec<PodStats>,
    /// Sum of the hourly price of every tracked instance
    pub total_hourly_price: f64,
}

impl StatsSummary {
    pub fn collect<'a>(
        node_name: &str,
        bindings: impl IntoIterator<Item = &'a Binding>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut pods: Vec<PodStats> = bindings
            .into_iter()
            .map(|binding| PodStats {
                namespace: binding
                    .pod
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
                name: binding.pod.metadata.name.clone().unwrap_or_default(),
                instance_id: binding.instance.id,
                gpu_name: binding.instance.gpu_name.clone(),
                num_gpus: binding.instance.num_gpus,
                hourly_price: binding.instance.dph_total,
                uptime_seconds: (now - binding.created_at).num_seconds().max(0),
            })
            .collect();
        pods.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

        Self {
            node_name: node_name.to_string(),
            collected_at: now,
            total_hourly_price: pods.iter().map(|p| p.hourly_price).sum(),
            pods,
        }
    }
}
