//! Translation of instance state into pod status.

use api_types::Instance;
use api_types::InstanceStatus;
use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::ContainerStateRunning;
use k8s_openapi::api::core::v1::ContainerStateTerminated;
use k8s_openapi::api::core::v1::ContainerStateWaiting;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::provider::state::Binding;

/// Pod phase for a vendor instance status.
pub const fn pod_phase(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Starting => "Pending",
        InstanceStatus::Running => "Running",
        InstanceStatus::Stopped => "Succeeded",
        InstanceStatus::Failed => "Failed",
        InstanceStatus::Unknown => "Pending",
    }
}

pub fn pod_status(binding: &Binding) -> PodStatus {
    let instance = &binding.instance;
    let ready = instance.status == InstanceStatus::Running;
    let started = Time(binding.created_at);

    let condition = |type_: &str, status: bool| PodCondition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        last_transition_time: Some(started.clone()),
        ..Default::default()
    };

    PodStatus {
        phase: Some(pod_phase(instance.status).to_string()),
        reason: instance
            .status_message
            .as_ref()
            .map(|_| format!("Instance{}", capitalized(instance.status))),
        message: instance.status_message.clone(),
        host_ip: instance.public_ip.clone(),
        pod_ip: instance.public_ip.clone(),
        start_time: Some(started.clone()),
        conditions: Some(vec![
            condition("PodScheduled", true),
            condition("Initialized", true),
            condition("ContainersReady", ready),
            condition("Ready", ready),
        ]),
        container_statuses: Some(vec![container_status(binding, ready)]),
        ..Default::default()
    }
}

/// The stored pod with a freshly synthesized status.
pub fn pod_with_status(binding: &Binding) -> Pod {
    let mut pod = binding.pod.clone();
    pod.status = Some(pod_status(binding));
    pod
}

/// A copy of `pod` marked as failed, used when it could not be scheduled.
pub fn failed_pod(pod: &Pod, reason: &str, message: &str) -> Pod {
    let mut failed = pod.clone();
    failed.status = Some(PodStatus {
        phase: Some("Failed".to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        ..pod.status.clone().unwrap_or_default()
    });
    failed
}

fn container_status(binding: &Binding, ready: bool) -> ContainerStatus {
    let instance = &binding.instance;
    let container = binding
        .pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first());

    ContainerStatus {
        name: container
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "workload".to_string()),
        image: container
            .and_then(|c| c.image.clone())
            .unwrap_or_default(),
        image_id: String::new(),
        container_id: Some(format!("marketplace://{}", instance.id)),
        ready,
        started: Some(ready),
        restart_count: 0,
        state: Some(container_state(instance, binding.created_at)),
        ..Default::default()
    }
}

fn container_state(instance: &Instance, started_at: DateTime<Utc>) -> ContainerState {
    match instance.status {
        InstanceStatus::Running => ContainerState {
            running: Some(ContainerStateRunning {
                started_at: Some(Time(started_at)),
            }),
            ..Default::default()
        },
        InstanceStatus::Stopped => ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                reason: Some("Completed".to_string()),
                message: instance.status_message.clone(),
                started_at: Some(Time(started_at)),
                ..Default::default()
            }),
            ..Default::default()
        },
        InstanceStatus::Failed => ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 1,
                reason: Some("Error".to_string()),
                message: instance.status_message.clone(),
                started_at: Some(Time(started_at)),
                ..Default::default()
            }),
            ..Default::default()
        },
        InstanceStatus::Starting | InstanceStatus::Unknown => ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some("ContainerCreating".to_string()),
                message: instance.status_message.clone(),
            }),
            ..Default::default()
        },
    }
}

fn capitalized(status: InstanceStatus) -> String {
    let status = status.to_string();
    let mut chars = status.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::testing;

    fn binding(status: InstanceStatus) -> Binding {
        Binding::new(
            testing::pod("speech", "asr-0"),
            Instance {
                id: 7,
                public_ip: Some("203.0.113.10".to_string()),
                status,
                port_map: BTreeMap::from([(8000, 41000)]),
                ..Default::default()
            },
        )
    }

    #[test]
    fn phase_table_is_total() {
        assert_eq!(pod_phase(InstanceStatus::Starting), "Pending");
        assert_eq!(pod_phase(InstanceStatus::Running), "Running");
        assert_eq!(pod_phase(InstanceStatus::Stopped), "Succeeded");
        assert_eq!(pod_phase(InstanceStatus::Failed), "Failed");
        assert_eq!(pod_phase(InstanceStatus::Unknown), "Pending");
    }

    #[test]
    fn running_instance_is_ready() {
        let binding = binding(InstanceStatus::Running);
        let status = pod_status(&binding);

        assert_eq!(status.phase.as_deref(), Some("Running"));
        assert_eq!(status.pod_ip.as_deref(), Some("203.0.113.10"));
        assert_eq!(status.host_ip.as_deref(), Some("203.0.113.10"));
        assert_eq!(status.start_time, Some(Time(binding.created_at)));

        let containers = status.container_statuses.unwrap();
        assert_eq!(containers.len(), 1);
        assert!(containers[0].ready);
        assert_eq!(containers[0].name, "speech");
        assert!(containers[0].state.as_ref().unwrap().running.is_some());

        let ready = status
            .conditions
            .unwrap()
            .into_iter()
            .find(|c| c.type_ == "Ready")
            .unwrap();
        assert_eq!(ready.status, "True");
    }

    #[test]
    fn starting_instance_is_pending_and_not_ready() {
        let status = pod_status(&binding(InstanceStatus::Starting));
        assert_eq!(status.phase.as_deref(), Some("Pending"));
        let containers = status.container_statuses.unwrap();
        assert!(!containers[0].ready);
        assert!(containers[0].state.as_ref().unwrap().waiting.is_some());
    }

    #[test]
    fn failed_instance_reports_vendor_message() {
        let mut binding = binding(InstanceStatus::Failed);
        binding.instance.status_message = Some("out of disk".to_string());
        let status = pod_status(&binding);

        assert_eq!(status.phase.as_deref(), Some("Failed"));
        assert_eq!(status.reason.as_deref(), Some("InstanceFailed"));
        assert_eq!(status.message.as_deref(), Some("out of disk"));
        let terminated = status.container_statuses.unwrap()[0]
            .state
            .clone()
            .unwrap()
            .terminated
            .unwrap();
        assert_eq!(terminated.exit_code, 1);
    }

    #[test]
    fn failed_pod_keeps_metadata() {
        let pod = testing::pod("speech", "asr-0");
        let failed = failed_pod(&pod, "ProviderFailed", "no offers");
        assert_eq!(failed.metadata.name.as_deref(), Some("asr-0"));
        let status = failed.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Failed"));
        assert_eq!(status.reason.as_deref(), Some("ProviderFailed"));
    }
}
