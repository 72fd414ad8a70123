use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;
use crate::provider::PodLifecycleHandler;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    daemon_args: DaemonArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run all tasks until one of them exits or a shutdown signal arrives
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    /// Log what is still rented so operators can reconcile by hand.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");

        // Instances outlive the process and are not destroyed here.
        match self.services.provider.get_stats_summary().await {
            Ok(summary) if !summary.pods.is_empty() => {
                for pod in &summary.pods {
                    tracing::warn!(
                        pod = %format!("{}/{}", pod.namespace, pod.name),
                        instance_id = pod.instance_id,
                        hourly_price = pod.hourly_price,
                        "Instance still rented at shutdown"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to summarize instances at shutdown: {e:?}"),
        }

        tracing::info!("Application shutdown completed");
        Ok(())
    }
}
