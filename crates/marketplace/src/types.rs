//! Vendor wire format.

use std::collections::BTreeMap;
use std::collections::HashMap;

use api_types::Instance;
use api_types::InstanceOffer;
use api_types::InstanceStatus;
use api_types::SearchCriteria;
use api_types::WorkloadSpec;
use chrono::DateTime;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub offers: Vec<InstanceOffer>,
}

/// Body of a lease request against an offer.
#[derive(Debug, Serialize)]
pub(crate) struct CreateInstanceRequest {
    pub client_id: &'static str,
    pub image: String,
    pub disk: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub runtype: &'static str,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onstart: Option<String>,
}

impl CreateInstanceRequest {
    pub fn new(workload: &WorkloadSpec) -> Self {
        let mut env = workload.env.clone();
        // the vendor exposes container ports through docker-style env keys
        for port in &workload.ports {
            env.insert(format!("-p {port}:{port}"), "1".to_string());
        }

        Self {
            client_id: "me",
            image: workload.image.clone(),
            disk: workload.disk_gb,
            label: workload.label.clone(),
            runtype: "args",
            args: workload.command.iter().skip(1).cloned().collect(),
            env,
            onstart: workload.startup_script(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateInstanceResponse {
    #[serde(default)]
    pub success: bool,
    pub new_contract: Option<u64>,
    pub error: Option<String>,
    pub msg: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceResponse {
    pub instances: Option<RawInstance>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PortBinding {
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawInstance {
    pub id: u64,
    pub actual_status: Option<String>,
    pub status_msg: Option<String>,
    pub public_ipaddr: Option<String>,
    #[serde(default)]
    pub ports: Option<HashMap<String, Vec<PortBinding>>>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    /// unix seconds
    pub start_date: Option<f64>,
    #[serde(default)]
    pub gpu_name: String,
    #[serde(default)]
    pub num_gpus: u32,
    #[serde(default)]
    pub dph_total: f64,
    pub geolocation: Option<String>,
    pub label: Option<String>,
}

impl RawInstance {
    fn port_map(&self) -> BTreeMap<u16, u16> {
        let Some(ports) = &self.ports else {
            return BTreeMap::new();
        };

        let mut port_map = BTreeMap::new();
        for (key, bindings) in ports {
            let (port, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            if proto != "tcp" {
                continue;
            }
            let Ok(internal) = port.parse::<u16>() else {
                continue;
            };
            if let Some(external) = bindings
                .iter()
                .find_map(|binding| binding.host_port.parse::<u16>().ok())
            {
                port_map.insert(internal, external);
            }
        }
        port_map
    }
}

impl From<RawInstance> for Instance {
    fn from(raw: RawInstance) -> Self {
        let port_map = raw.port_map();
        let status = raw
            .actual_status
            .as_deref()
            .map(InstanceStatus::from_vendor)
            .unwrap_or_default();
        let created_at = raw
            .start_date
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

        Self {
            id: raw.id,
            public_ip: raw.public_ipaddr.map(|ip| ip.trim().to_string()),
            status,
            status_message: raw.status_msg,
            port_map,
            ssh_host: raw.ssh_host,
            ssh_port: raw.ssh_port,
            created_at,
            gpu_name: raw.gpu_name,
            num_gpus: raw.num_gpus,
            dph_total: raw.dph_total,
            geolocation: raw.geolocation,
            label: raw.label,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogsResponse {
    #[serde(default)]
    pub success: bool,
    pub result_url: Option<String>,
}

/// Encode search criteria into the vendor's JSON query language.
///
/// The GPU model is a substring match the vendor cannot express, so it is
/// left to [`SearchCriteria::admits`] on the returned offers.
pub(crate) fn search_query(criteria: &SearchCriteria) -> Value {
    let mut query = json!({
        "gpu_ram": { "gte": criteria.min_gpu_ram_mb },
        "dph_total": { "lte": criteria.max_price_per_hour },
        "reliability2": { "gte": criteria.min_reliability },
        "inet_up": { "gte": criteria.min_inet_up_mbps },
        "inet_down": { "gte": criteria.min_inet_down_mbps },
        "num_gpus": { "gte": criteria.num_gpus },
        "order": [["dph_total", "asc"]],
        "type": "on-demand",
    });

    if !criteria.preferred_regions.is_empty() {
        query["geolocation"] = json!({ "in": criteria.preferred_regions });
    }
    if criteria.require_verified {
        query["verified"] = json!({ "eq": true });
    }
    if criteria.require_rentable {
        query["rentable"] = json!({ "eq": true });
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_instance_converts_ports_and_status() {
        let raw: RawInstance = serde_json::from_value(json!({
            "id": 99,
            "actual_status": "running",
            "public_ipaddr": "203.0.113.7\n",
            "ports": {
                "8000/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "41000" }],
                "8765/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "41001" }],
                "8765/udp": [{ "HostIp": "0.0.0.0", "HostPort": "41002" }],
                "22/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "41003" }]
            },
            "ssh_host": "ssh5.example.com",
            "ssh_port": 12345,
            "start_date": 1700000000.5,
            "gpu_name": "RTX 4090",
            "num_gpus": 1,
            "dph_total": 0.4,
            "geolocation": "Norway, NO",
            "label": "default/asr-0"
        }))
        .unwrap();

        let instance = Instance::from(raw);
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.public_ip.as_deref(), Some("203.0.113.7"));
        similar_asserts::assert_eq!(
            instance.port_map,
            BTreeMap::from([(22, 41003), (8000, 41000), (8765, 41001)])
        );
        assert_eq!(instance.created_at.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(instance.ssh_port, Some(12345));
    }

    #[test]
    fn raw_instance_without_status_is_unknown() {
        let raw: RawInstance = serde_json::from_value(json!({ "id": 1 })).unwrap();
        let instance = Instance::from(raw);
        assert_eq!(instance.status, InstanceStatus::Unknown);
        assert!(instance.port_map.is_empty());
    }

    #[test]
    fn create_request_exposes_ports_through_env() {
        let workload = WorkloadSpec {
            pod_name: "asr-0".into(),
            namespace: "default".into(),
            image: "registry.example.com/speech:1.0".into(),
            command: vec!["python".into(), "serve.py".into()],
            env: BTreeMap::from([("MODEL".to_string(), "large-v3".to_string())]),
            ports: vec![8000, 8765],
            disk_gb: 40.0,
            label: Some("default/asr-0".into()),
        };

        let body = serde_json::to_value(CreateInstanceRequest::new(&workload)).unwrap();
        assert_eq!(body["client_id"], "me");
        assert_eq!(body["image"], "registry.example.com/speech:1.0");
        assert_eq!(body["disk"], 40.0);
        assert_eq!(body["env"]["MODEL"], "large-v3");
        assert_eq!(body["env"]["-p 8000:8000"], "1");
        assert_eq!(body["env"]["-p 8765:8765"], "1");
        assert_eq!(body["args"], json!(["serve.py"]));
        assert_eq!(body["onstart"], "#!/bin/bash\nexec python serve.py\n");
    }

    #[test]
    fn search_query_encodes_every_criterion() {
        let criteria = SearchCriteria {
            gpu_name: Some("RTX 4090".into()),
            preferred_regions: vec!["SE".into(), "NO".into()],
            ..SearchCriteria::default()
        };

        let query = search_query(&criteria);
        assert!(query.get("gpu_name").is_none());
        assert_eq!(query["gpu_ram"]["gte"], 16 * 1024);
        assert_eq!(query["dph_total"]["lte"], 0.5);
        assert_eq!(query["reliability2"]["gte"], 0.9);
        assert_eq!(query["inet_up"]["gte"], 100.0);
        assert_eq!(query["inet_down"]["gte"], 100.0);
        assert_eq!(query["geolocation"]["in"], json!(["SE", "NO"]));
        assert_eq!(query["verified"]["eq"], true);
        assert_eq!(query["rentable"]["eq"], true);
    }

    #[test]
    fn search_query_omits_optional_filters() {
        let criteria = SearchCriteria {
            require_verified: false,
            require_rentable: false,
            ..SearchCriteria::default()
        };
        let query = search_query(&criteria);
        assert!(query.get("gpu_name").is_none());
        assert!(query.get("geolocation").is_none());
        assert!(query.get("verified").is_none());
        assert!(query.get("rentable").is_none());
    }
}
