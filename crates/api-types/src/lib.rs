//! Shared marketplace type definitions
//!
//! This crate contains the data model shared by the marketplace client and the
//! virtual node: advertised offers, search criteria, leased instances and the
//! marketplace-facing projection of a pod.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// An advertised, not-yet-leased marketplace listing.
///
/// Field names follow the vendor wire format so offers deserialize directly
/// from search responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstanceOffer {
    /// Offer id, used as the lease target
    pub id: u64,
    /// Public host hint
    #[serde(rename = "public_ipaddr", default)]
    pub public_ip: Option<String>,
    /// Free-form location, e.g. "Norway, NO"
    #[serde(default)]
    pub geolocation: Option<String>,
    /// GPU model name
    #[serde(default)]
    pub gpu_name: String,
    /// Memory per GPU in MB
    #[serde(rename = "gpu_ram", default)]
    pub gpu_ram_mb: u64,
    /// Number of GPUs in the offer
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,
    /// Total hourly price in dollars
    #[serde(default)]
    pub dph_total: f64,
    /// Historical uptime ratio in `[0, 1]`
    #[serde(rename = "reliability2", alias = "reliability", default)]
    pub reliability: f64,
    /// Upload bandwidth in Mbps
    #[serde(rename = "inet_up", default)]
    pub inet_up_mbps: f64,
    /// Download bandwidth in Mbps
    #[serde(rename = "inet_down", default)]
    pub inet_down_mbps: f64,
    /// Upload cost per GB
    #[serde(default)]
    pub inet_up_cost: f64,
    /// Download cost per GB
    #[serde(default)]
    pub inet_down_cost: f64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub rentable: bool,
    #[serde(default)]
    pub cpu_cores: f64,
    /// System RAM in MB
    #[serde(rename = "cpu_ram", default)]
    pub cpu_ram_mb: u64,
    /// Disk size in GB
    #[serde(rename = "disk_space", default)]
    pub disk_space_gb: f64,
    /// Raw vendor startup-script field
    #[serde(default)]
    pub onstart: Option<String>,
}

fn default_num_gpus() -> u32 {
    1
}

impl InstanceOffer {
    /// Memory per GPU in GB
    pub fn gpu_ram_gb(&self) -> f64 {
        self.gpu_ram_mb as f64 / 1024.0
    }
}

/// Search constraints derived from a pod's resource ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Case-insensitive GPU model substring, e.g. "RTX 4090"
    pub gpu_name: Option<String>,
    pub min_gpu_ram_mb: u64,
    pub max_price_per_hour: f64,
    pub min_reliability: f64,
    pub min_inet_up_mbps: f64,
    pub min_inet_down_mbps: f64,
    /// Regions in order of preference; empty means anywhere
    pub preferred_regions: Vec<String>,
    pub require_verified: bool,
    pub require_rentable: bool,
    pub num_gpus: u32,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            gpu_name: None,
            min_gpu_ram_mb: 16 * 1024,
            max_price_per_hour: 0.50,
            min_reliability: 0.90,
            min_inet_up_mbps: 100.0,
            min_inet_down_mbps: 100.0,
            preferred_regions: Vec::new(),
            require_verified: true,
            require_rentable: true,
            num_gpus: 1,
        }
    }
}

impl SearchCriteria {
    /// Check whether an offer satisfies every hard constraint.
    ///
    /// Preferred regions are a soft preference and are not checked here.
    pub fn admits(&self, offer: &InstanceOffer) -> bool {
        if let Some(gpu_name) = &self.gpu_name {
            if !offer
                .gpu_name
                .to_lowercase()
                .contains(&gpu_name.to_lowercase())
            {
                return false;
            }
        }

        offer.gpu_ram_mb >= self.min_gpu_ram_mb
            && offer.dph_total <= self.max_price_per_hour
            && offer.reliability >= self.min_reliability
            && offer.inet_up_mbps >= self.min_inet_up_mbps
            && offer.inet_down_mbps >= self.min_inet_down_mbps
            && offer.num_gpus >= self.num_gpus
            && (!self.require_verified || offer.verified)
            && (!self.require_rentable || offer.rentable)
    }

    /// Position of the first preferred region matching an offer location.
    ///
    /// Locations look like `"Sweden, SE"`; a region matches one whole
    /// comma-separated segment, ignoring case.
    pub fn region_rank(&self, geolocation: Option<&str>) -> Option<usize> {
        let segments: Vec<&str> = geolocation?
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect();
        self.preferred_regions.iter().position(|region| {
            let region = region.trim();
            segments
                .iter()
                .any(|segment| segment.eq_ignore_ascii_case(region))
        })
    }
}

/// Lifecycle status of a leased instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl InstanceStatus {
    /// Map a vendor status string onto the closed status set.
    pub fn from_vendor(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "loading" | "created" | "scheduling" | "starting" | "booting" => Self::Starting,
            "exited" | "stopped" | "offline" | "inactive" => Self::Stopped,
            "failed" | "error" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A leased, running or transitioning marketplace instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Instance {
    pub id: u64,
    pub public_ip: Option<String>,
    pub status: InstanceStatus,
    /// Vendor-provided detail about the current status
    pub status_message: Option<String>,
    /// Internal container port -> externally reachable port
    pub port_map: BTreeMap<u16, u16>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub created_at: Option<DateTime<Utc>>,
    pub gpu_name: String,
    pub num_gpus: u32,
    /// Hourly price in dollars
    pub dph_total: f64,
    pub geolocation: Option<String>,
    pub label: Option<String>,
}

impl Instance {
    /// External port mapped to the given internal container port
    pub fn external_port(&self, internal_port: u16) -> Option<u16> {
        self.port_map.get(&internal_port).copied()
    }
}

/// Marketplace-facing projection of a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkloadSpec {
    pub pod_name: String,
    pub namespace: String,
    /// Container image to run on the instance
    pub image: String,
    /// Container command followed by its arguments
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Internal container ports that must be reachable from outside
    pub ports: Vec<u16>,
    pub disk_gb: f64,
    pub label: Option<String>,
}

impl WorkloadSpec {
    /// Shell startup script running the workload command, if any
    pub fn startup_script(&self) -> Option<String> {
        if self.command.is_empty() {
            return None;
        }
        let quoted = self
            .command
            .iter()
            .map(|part| shell_quote(part))
            .collect::<Vec<_>>()
            .join(" ");
        Some(format!("#!/bin/bash\nexec {quoted}\n"))
    }
}

fn shell_quote(part: &str) -> String {
    if !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@".contains(c))
    {
        part.to_string()
    } else {
        format!("'{}'", part.replace('\'', r"'\''"))
    }
}
