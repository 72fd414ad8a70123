//! Periodic node heartbeat and pod status sweep.

use std::sync::Arc;
use std::time::Duration;

use api_types::InstanceStatus;
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::provider::handler::NodeStatusSink;
use crate::provider::state::Binding;
use crate::provider::status;
use crate::provider::NodeProvider;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl NodeProvider {
    /// Publish the node object every `period` until cancelled.
    #[tracing::instrument(skip(self, sink, cancellation_token), fields(node = %self.node_name()))]
    pub async fn run_node_heartbeat(
        &self,
        sink: Arc<dyn NodeStatusSink>,
        period: Duration,
        cancellation_token: CancellationToken,
    ) {
        info!(?period, "Starting node heartbeat");
        let mut ticker = ticker(period);
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Node heartbeat shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = sink.update_node(self.node_status()).await {
                        warn!("Failed to publish node status: {e:?}");
                    }
                }
            }
        }
    }

    /// Reconcile pod status with the marketplace every `period` until cancelled.
    #[tracing::instrument(skip(self, cancellation_token), fields(node = %self.node_name()))]
    pub async fn run_pod_sweep(&self, period: Duration, cancellation_token: CancellationToken) {
        info!(?period, "Starting pod status sweep");
        let mut ticker = ticker(period);
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod status sweep shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.sweep_once().await,
            }
        }
    }

    /// One reconciliation pass over every binding plus the orphan queue.
    pub async fn sweep_once(&self) {
        let snapshot: Vec<(String, Binding)> = self
            .state
            .read()
            .await
            .bindings
            .iter()
            .map(|(key, binding)| (key.clone(), binding.clone()))
            .collect();
        debug!(pods = snapshot.len(), "Sweeping pod status");

        for (key, binding) in snapshot {
            // Deleted mid-sweep: the instance was released on purpose.
            let Some(binding) = self.refresh(&key, binding).await else {
                debug!(pod = %key, "Pod deleted during sweep");
                continue;
            };
            self.notify(status::pod_with_status(&binding)).await;

            if !binding.endpoints_synced && binding.instance.status == InstanceStatus::Running {
                self.sync_endpoints(&key, &binding.pod, &binding.instance)
                    .await;
            }
        }

        self.retry_orphans().await;
    }

    async fn retry_orphans(&self) {
        let orphans = std::mem::take(&mut self.state.write().await.orphans);
        if orphans.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        for instance_id in orphans {
            match self.marketplace.destroy_instance(instance_id).await {
                Ok(()) => info!(instance_id, "Orphaned instance destroyed"),
                Err(e) => {
                    warn!(instance_id, "Orphaned instance still not destroyed: {e:?}");
                    remaining.push(instance_id);
                }
            }
        }

        if !remaining.is_empty() {
            let mut state = self.state.write().await;
            for instance_id in remaining {
                state.queue_orphan(instance_id);
            }
        }
    }
}
