//! The synthetic node object advertised by the heartbeat.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::NodeAddress;
use k8s_openapi::api::core::v1::NodeCondition;
use k8s_openapi::api::core::v1::NodeSpec;
use k8s_openapi::api::core::v1::NodeStatus;
use k8s_openapi::api::core::v1::NodeSystemInfo;
use k8s_openapi::api::core::v1::Taint;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use utils::version;

use crate::scheduler::criteria::GPU_RESOURCE;

pub const TAINT_KEY: &str = "virtual-kubelet.io/provider";
pub const TAINT_VALUE: &str = "gpu-marketplace";

/// Capacity advertised for the virtual node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_name: String,
    pub cpu: String,
    pub memory: String,
    pub pods: String,
    pub gpus: String,
}

impl NodeConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            cpu: "64".to_string(),
            memory: "512Gi".to_string(),
            pods: "100".to_string(),
            gpus: "8".to_string(),
        }
    }
}

pub fn build_node(config: &NodeConfig, now: DateTime<Utc>) -> Node {
    let capacity = BTreeMap::from([
        ("cpu".to_string(), Quantity(config.cpu.clone())),
        ("memory".to_string(), Quantity(config.memory.clone())),
        ("pods".to_string(), Quantity(config.pods.clone())),
        (GPU_RESOURCE.to_string(), Quantity(config.gpus.clone())),
    ]);

    let condition = |type_: &str, status: &str, reason: &str, message: &str| NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_heartbeat_time: Some(Time(now)),
        last_transition_time: Some(Time(now)),
    };

    Node {
        metadata: ObjectMeta {
            name: Some(config.node_name.clone()),
            labels: Some(BTreeMap::from([
                ("type".to_string(), "virtual-kubelet".to_string()),
                ("kubernetes.io/role".to_string(), "agent".to_string()),
                ("kubernetes.io/hostname".to_string(), config.node_name.clone()),
                ("kubernetes.io/os".to_string(), "linux".to_string()),
                (
                    "node.kubernetes.io/instance-type".to_string(),
                    TAINT_VALUE.to_string(),
                ),
            ])),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: Some(vec![Taint {
                key: TAINT_KEY.to_string(),
                value: Some(TAINT_VALUE.to_string()),
                effect: "NoSchedule".to_string(),
                time_added: None,
            }]),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            capacity: Some(capacity.clone()),
            allocatable: Some(capacity),
            conditions: Some(vec![
                condition("Ready", "True", "KubeletReady", "marketplace provider is ready"),
                condition(
                    "MemoryPressure",
                    "False",
                    "KubeletHasSufficientMemory",
                    "no memory pressure",
                ),
                condition(
                    "DiskPressure",
                    "False",
                    "KubeletHasNoDiskPressure",
                    "no disk pressure",
                ),
                condition(
                    "PIDPressure",
                    "False",
                    "KubeletHasSufficientPID",
                    "no PID pressure",
                ),
                condition(
                    "NetworkUnavailable",
                    "False",
                    "RouteCreated",
                    "instances are reached through public addresses",
                ),
            ]),
            addresses: Some(vec![NodeAddress {
                type_: "Hostname".to_string(),
                address: config.node_name.clone(),
            }]),
            node_info: Some(NodeSystemInfo {
                architecture: "amd64".to_string(),
                operating_system: "linux".to_string(),
                kubelet_version: format!("gpu-virtual-node/{}", &**version::VERSION),
                os_image: "marketplace".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_advertises_capacity_and_readiness() {
        let now = Utc::now();
        let node = build_node(&NodeConfig::new("vnode-0"), now);

        assert_eq!(node.metadata.name.as_deref(), Some("vnode-0"));
        let status = node.status.unwrap();
        let capacity = status.capacity.unwrap();
        assert_eq!(capacity["nvidia.com/gpu"], Quantity("8".to_string()));
        assert_eq!(capacity["pods"], Quantity("100".to_string()));
        assert_eq!(status.allocatable.unwrap(), capacity);

        let conditions = status.conditions.unwrap();
        for condition in &conditions {
            let expected = if condition.type_ == "Ready" { "True" } else { "False" };
            assert_eq!(condition.status, expected, "{}", condition.type_);
            assert_eq!(condition.last_heartbeat_time, Some(Time(now)));
        }
        assert!(conditions.iter().any(|c| c.type_ == "Ready"));
    }

    #[test]
    fn node_is_tainted_for_marketplace_pods() {
        let node = build_node(&NodeConfig::new("vnode-0"), Utc::now());
        let taints = node.spec.unwrap().taints.unwrap();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, TAINT_KEY);
        assert_eq!(taints[0].effect, "NoSchedule");
    }
}
