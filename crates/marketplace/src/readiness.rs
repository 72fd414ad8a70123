//! Waiting for a freshly leased instance to become ready.
//!
//! An instance is ready once the vendor reports it running and every exposed
//! port passes the application health check. The wait is bounded by a hard
//! deadline and can be cancelled by the caller.

use std::time::Duration;

use api_types::Instance;
use api_types::InstanceStatus;
use async_trait::async_trait;
use error_stack::Report;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::MarketplaceError;
use crate::error::MarketplaceResult;

/// Source of instance state used while waiting for readiness.
#[async_trait]
pub trait InstanceProbe: Send + Sync {
    /// Point-in-time instance read
    async fn fetch_instance(&self, instance_id: u64) -> MarketplaceResult<Instance>;

    /// Application health check over the given internal ports
    async fn check_health(&self, instance: &Instance, internal_ports: &[u16]) -> bool;
}

/// Polling cadence and deadline.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

/// Poll until the instance is running and healthy.
///
/// # Errors
///
/// - [`MarketplaceError::ProvisionFailed`] as soon as the vendor reports failure
/// - [`MarketplaceError::ProvisionTimeout`] once the deadline passes
/// - [`MarketplaceError::Cancelled`] if `cancellation_token` fires first
#[tracing::instrument(skip(probe, internal_ports, policy, cancellation_token))]
pub async fn wait_for_instance_ready<P>(
    probe: &P,
    instance_id: u64,
    internal_ports: &[u16],
    policy: ReadinessPolicy,
    cancellation_token: &CancellationToken,
) -> MarketplaceResult<Instance>
where
    P: InstanceProbe + ?Sized,
{
    let poll = poll_until_ready(probe, instance_id, internal_ports, policy.poll_interval);

    tokio::select! {
        _ = cancellation_token.cancelled() => {
            info!("Readiness wait cancelled");
            Err(Report::new(MarketplaceError::Cancelled { instance_id }))
        }
        result = timeout(policy.timeout, poll) => match result {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = policy.timeout.as_secs(), "Instance did not become ready in time");
                Err(Report::new(MarketplaceError::ProvisionTimeout {
                    instance_id,
                    seconds: policy.timeout.as_secs(),
                }))
            }
        },
    }
}

async fn poll_until_ready<P>(
    probe: &P,
    instance_id: u64,
    internal_ports: &[u16],
    poll_interval: Duration,
) -> MarketplaceResult<Instance>
where
    P: InstanceProbe + ?Sized,
{
    let mut last_status = InstanceStatus::Unknown;

    loop {
        match probe.fetch_instance(instance_id).await {
            Ok(instance) => {
                if instance.status != last_status {
                    info!(from = %last_status, to = %instance.status, "Instance status changed");
                    last_status = instance.status;
                }

                match instance.status {
                    InstanceStatus::Failed => {
                        return Err(Report::new(MarketplaceError::ProvisionFailed {
                            instance_id,
                            message: instance
                                .status_message
                                .clone()
                                .unwrap_or_else(|| "vendor reported failure".to_string()),
                        }));
                    }
                    InstanceStatus::Running => {
                        if probe.check_health(&instance, internal_ports).await {
                            info!("Instance is running and healthy");
                            return Ok(instance);
                        }
                        debug!("Instance running but not healthy yet");
                    }
                    InstanceStatus::Unknown | InstanceStatus::Starting | InstanceStatus::Stopped => {}
                }
            }
            // freshly leased ids can lag behind on the vendor side
            Err(e) => warn!("Failed to poll instance, will retry: {e}"),
        }

        sleep(poll_interval).await;
    }
}
