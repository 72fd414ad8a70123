//! GPU spot marketplace client.
//!
//! This library wraps the marketplace REST surface used by the virtual node:
//!
//! - connection test with the configured API key
//! - offer search from [`SearchCriteria`]
//! - instance lease, followed by a bounded, cancellable wait until the
//!   instance is running and passes an application health check
//! - point-in-time instance reads, idempotent destroy and best-effort logs
//!
//! Consumers program against the [`Marketplace`] trait so that scheduling and
//! lifecycle logic can be exercised without a live vendor.
//!
//! # Examples
//!
//! ```no_run
//! # use marketplace::{Marketplace, MarketplaceClient, MarketplaceConfig};
//! # use api_types::SearchCriteria;
//! # async fn run() -> marketplace::MarketplaceResult<()> {
//! let client = MarketplaceClient::new(MarketplaceConfig::new("api-key"))?;
//! client.test_connection().await?;
//! let offers = client.search_instances(&SearchCriteria::default()).await?;
//! println!("{} offers", offers.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod readiness;
mod types;

use api_types::Instance;
use api_types::InstanceOffer;
use api_types::InstanceStatus;
use api_types::SearchCriteria;
use api_types::WorkloadSpec;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use client::MarketplaceClient;
pub use config::MarketplaceConfig;
pub use error::MarketplaceError;
pub use error::MarketplaceResult;

/// Operations offered by the GPU marketplace.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Verify credentials and reachability.
    async fn test_connection(&self) -> MarketplaceResult<()>;

    /// Search for offers matching the criteria. An empty result is not an error.
    async fn search_instances(
        &self,
        criteria: &SearchCriteria,
    ) -> MarketplaceResult<Vec<InstanceOffer>>;

    /// Lease an offer and wait until the instance is ready.
    ///
    /// A rejected lease fails with [`MarketplaceError::Provision`]; readiness
    /// failures destroy the leased instance before returning.
    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        workload: &WorkloadSpec,
        cancellation_token: CancellationToken,
    ) -> MarketplaceResult<Instance>;

    async fn get_instance(&self, instance_id: u64) -> MarketplaceResult<Instance>;

    async fn get_instance_status(&self, instance_id: u64) -> MarketplaceResult<InstanceStatus> {
        self.get_instance(instance_id)
            .await
            .map(|instance| instance.status)
    }

    /// Always fails: instances cannot be reconfigured in place.
    async fn update_instance(
        &self,
        instance_id: u64,
        workload: &WorkloadSpec,
    ) -> MarketplaceResult<Instance>;

    /// Destroy an instance; an already missing instance counts as destroyed.
    async fn destroy_instance(&self, instance_id: u64) -> MarketplaceResult<()>;

    /// Best-effort log retrieval, degrading to a placeholder text.
    async fn get_instance_logs(&self, instance_id: u64) -> String;
}
