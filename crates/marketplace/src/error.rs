//! Error types for marketplace operations.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for marketplace operations.
pub type MarketplaceResult<T> = Result<T, Report<MarketplaceError>>;

/// Errors that can occur while talking to the marketplace.
#[derive(Debug, Display)]
pub enum MarketplaceError {
    /// API key rejected or marketplace unreachable
    #[display("Marketplace authentication failed: {message}")]
    Auth { message: String },

    /// Offer search failed in transport or decoding
    #[display("Offer search failed: {message}")]
    Search { message: String },

    /// Lease request rejected for a specific offer
    #[display("Lease request for offer {offer_id} rejected: {message}")]
    Provision { offer_id: u64, message: String },

    /// Lease accepted but the instance never became ready
    #[display("Instance {instance_id} not ready within {seconds}s")]
    ProvisionTimeout { instance_id: u64, seconds: u64 },

    /// Vendor reported the instance as failed
    #[display("Instance {instance_id} failed to start: {message}")]
    ProvisionFailed { instance_id: u64, message: String },

    /// Caller gave up waiting for the instance
    #[display("Provisioning of instance {instance_id} was cancelled")]
    Cancelled { instance_id: u64 },

    #[display("Instance {instance_id} not found")]
    NotFound { instance_id: u64 },

    /// Operation has no marketplace equivalent
    #[display("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// Any other transport or HTTP status failure
    #[display("Marketplace request failed: {message}")]
    Request { message: String },

    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error for MarketplaceError {}

impl MarketplaceError {
    /// Whether the scheduler may move on to another offer after this error.
    pub const fn is_retryable_with_other_offer(&self) -> bool {
        matches!(self, Self::Provision { .. })
    }
}
