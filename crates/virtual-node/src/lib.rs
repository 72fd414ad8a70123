//! Virtual Kubernetes node backed by rented marketplace GPU instances.

pub mod app;
pub mod config;
pub mod endpoints;
pub mod k8s;
pub mod provider;
pub mod scheduler;

#[cfg(test)]
mod testing;
