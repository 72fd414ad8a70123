//! Application-level health probing of leased instances.

use std::time::Duration;

use api_types::Instance;
use futures::future::join_all;
use reqwest::Client;
use tracing::debug;

/// Probes the externally mapped ports of an instance over HTTP.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: Client,
    path: String,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(client: Client, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            path: path.into(),
            timeout,
        }
    }

    /// Check that every given internal port answers through its external mapping.
    ///
    /// All probes run concurrently, each with its own timeout. A port without
    /// an external mapping, or an instance without a public IP, is not ready.
    pub async fn check(&self, instance: &Instance, internal_ports: &[u16]) -> bool {
        let Some(ip) = instance.public_ip.as_deref() else {
            debug!(instance_id = instance.id, "Instance has no public IP yet");
            return false;
        };

        let mut targets = Vec::with_capacity(internal_ports.len());
        for internal in internal_ports {
            match instance.external_port(*internal) {
                Some(external) => targets.push((*internal, external)),
                None => {
                    debug!(
                        instance_id = instance.id,
                        internal_port = internal,
                        "Port not mapped yet"
                    );
                    return false;
                }
            }
        }

        let probes = targets
            .iter()
            .map(|(internal, external)| self.probe(instance.id, ip, *internal, *external));
        join_all(probes).await.into_iter().all(|healthy| healthy)
    }

    async fn probe(&self, instance_id: u64, ip: &str, internal: u16, external: u16) -> bool {
        let url = format!("http://{ip}:{external}{}", self.path);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(
                    instance_id,
                    internal_port = internal,
                    status = response.status().as_u16(),
                    "Health probe returned non-success status"
                );
                false
            }
            Err(e) => {
                debug!(
                    instance_id,
                    internal_port = internal,
                    "Health probe failed: {e}"
                );
                false
            }
        }
    }
}
