//! CrownLabs Instance Controller
//!
//! Realizes every Instance as the set of cluster objects its Template
//! describes:
//! - VirtualMachine environments: a cloud-init Secret, a Service with an
//!   optional GUI Ingress, and either a VirtualMachine booting from an
//!   imported DataVolume (persistent) or a bare VirtualMachineInstance
//! - Container environments: a Service with GUI and file browser Ingresses,
//!   an optional home PersistentVolumeClaim and a Deployment
//!
//! The observed workload state is reported back on the Instance status.

mod backoff;
mod cluster;
mod config;
mod controller;
mod error;
mod events;
mod forge;
mod metrics;
mod reconcile_helpers;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Instance Controller");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Namespace whitelist: {:?}", config.namespace_whitelist);
    info!("  Website base URL: {}", config.website_base_url);
    info!("  Max concurrent reconciles: {}", config.max_concurrent_reconciles);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await
}
