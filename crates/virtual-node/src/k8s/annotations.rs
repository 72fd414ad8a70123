use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;

use crate::k8s::types::KubernetesError;

/// Domain prefix for scheduling annotations.
pub const ANNOTATION_DOMAIN: &str = "gpu.vnode.io";

/// Scheduling hints a pod can carry as annotations.
///
/// Anything left unset falls back to the node's default policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketplaceAnnotations {
    /// GPU model substring, e.g. "RTX 4090"
    pub gpu_type: Option<String>,
    /// Minimum memory per GPU in bytes
    pub min_gpu_memory: Option<u64>,
    /// Maximum hourly price in dollars
    pub max_price: Option<f64>,
    pub min_reliability: Option<f64>,
    /// Upload and download floor in Mbps
    pub min_bandwidth_mbps: Option<f64>,
    /// Preferred regions, most preferred first
    pub regions: Option<Vec<String>>,
    /// Disk to allocate on the instance in GB
    pub disk_gb: Option<f64>,
}

impl MarketplaceAnnotations {
    /// Parse scheduling annotations from a Kubernetes pod's annotations.
    ///
    /// Only annotations under [`ANNOTATION_DOMAIN`] are considered.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::AnnotationParseError`] if annotation values are invalid
    pub fn from_pod_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, Report<KubernetesError>> {
        let mut result = Self::default();

        if let Some(value) = annotation(annotations, "gpu-type") {
            let value = value.trim();
            if !value.is_empty() {
                result.gpu_type = Some(value.to_string());
            }
        }

        if let Some(value) = annotation(annotations, "min-gpu-memory") {
            result.min_gpu_memory = Some(parse_memory_value(value)?);
        }

        if let Some(value) = annotation(annotations, "max-price") {
            let price = parse_float("max-price", value)?;
            if !price.is_finite() || price <= 0.0 {
                return Err(Report::new(KubernetesError::AnnotationParseError {
                    message: format!("max-price must be positive, got {value}"),
                }));
            }
            result.max_price = Some(price);
        }

        if let Some(value) = annotation(annotations, "min-reliability") {
            let reliability = parse_float("min-reliability", value)?;
            if !(0.0..=1.0).contains(&reliability) {
                return Err(Report::new(KubernetesError::AnnotationParseError {
                    message: format!("min-reliability must be within [0, 1], got {value}"),
                }));
            }
            result.min_reliability = Some(reliability);
        }

        if let Some(value) = annotation(annotations, "min-bandwidth-mbps") {
            let bandwidth = parse_float("min-bandwidth-mbps", value)?;
            if !bandwidth.is_finite() || bandwidth < 0.0 {
                return Err(Report::new(KubernetesError::AnnotationParseError {
                    message: format!("min-bandwidth-mbps must not be negative, got {value}"),
                }));
            }
            result.min_bandwidth_mbps = Some(bandwidth);
        }

        if let Some(value) = annotation(annotations, "regions") {
            let regions: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !regions.is_empty() {
                result.regions = Some(regions);
            }
        }

        if let Some(value) = annotation(annotations, "disk-gb") {
            let disk = parse_float("disk-gb", value)?;
            if !disk.is_finite() || disk <= 0.0 {
                return Err(Report::new(KubernetesError::AnnotationParseError {
                    message: format!("disk-gb must be positive, got {value}"),
                }));
            }
            result.disk_gb = Some(disk);
        }

        Ok(result)
    }

    /// Check if any scheduling annotations are present.
    pub const fn has_annotations(&self) -> bool {
        self.gpu_type.is_some()
            || self.min_gpu_memory.is_some()
            || self.max_price.is_some()
            || self.min_reliability.is_some()
            || self.min_bandwidth_mbps.is_some()
            || self.regions.is_some()
            || self.disk_gb.is_some()
    }
}

fn annotation<'a>(annotations: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(&format!("{ANNOTATION_DOMAIN}/{key}"))
        .map(String::as_str)
}

fn parse_float(key: &str, value: &str) -> Result<f64, Report<KubernetesError>> {
    value
        .trim()
        .parse::<f64>()
        .change_context(KubernetesError::AnnotationParseError {
            message: format!("Invalid {key} value: {value}"),
        })
}

/// Parse memory value from string, supporting units like "1Gi", "500Mi", etc.
///
/// Supports the following units:
/// - Bytes: no suffix or "B"
/// - Kilobytes: "Ki", "K"
/// - Megabytes: "Mi", "M"
/// - Gigabytes: "Gi", "G"
/// - Terabytes: "Ti", "T"
///
/// # Errors
///
/// - [`KubernetesError::AnnotationParseError`] if the memory value format is invalid
pub fn parse_memory_value(value: &str) -> Result<u64, Report<KubernetesError>> {
    let value = value.trim();

    if let Ok(bytes) = value.parse::<u64>() {
        return Ok(bytes);
    }

    let (numeric_part, unit) = if let Some(pos) = value.find(|c: char| c.is_alphabetic()) {
        (&value[..pos], &value[pos..])
    } else {
        return Err(Report::new(KubernetesError::AnnotationParseError {
            message: format!("Invalid memory value format: {value}"),
        }));
    };

    let numeric_value: f64 =
        numeric_part
            .trim()
            .parse::<f64>()
            .change_context(KubernetesError::AnnotationParseError {
                message: format!("Invalid numeric part in memory value: {numeric_part}"),
            })?;
    if numeric_value < 0.0 {
        return Err(Report::new(KubernetesError::AnnotationParseError {
            message: format!("Negative memory value: {value}"),
        }));
    }

    let multiplier = match unit.to_uppercase().as_str() {
        "B" => 1,
        "K" | "KI" => 1024,
        "M" | "MI" => 1024 * 1024,
        "G" | "GI" => 1024 * 1024 * 1024,
        "T" | "TI" => 1024_u64.pow(4),
        _ => {
            return Err(Report::new(KubernetesError::AnnotationParseError {
                message: format!("Unsupported memory unit: {unit}"),
            }));
        }
    };

    Ok((numeric_value * multiplier as f64) as u64)
}
