//! Application module
//!
//! Wires the marketplace client, the node provider and the cluster
//! integration together and drives them until shutdown.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
pub use services::ApplicationServices;
