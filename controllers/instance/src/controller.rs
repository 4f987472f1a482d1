//! Main controller implementation.
//!
//! Wires the live cluster client, event recorder, readiness watcher and
//! reconciler together, then runs the Instance watcher next to the
//! probes/metrics server.

use crate::cluster::KubeCluster;
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::{CONTROLLER_NAME, KubeEventPublisher};
use crate::metrics::{self, Metrics};
use crate::reconciler::{ReadinessWatcher, Reconciler};
use crate::watcher::{Context, watch_instances};
use futures::channel::mpsc;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Instance controller: one watcher task and the metrics server.
#[derive(Debug)]
pub struct Controller {
    instance_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
    metrics: Arc<Metrics>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Instance Controller");

        let kube_client = Client::try_default().await?;
        let cluster = KubeCluster::new(kube_client.clone());
        let events = Arc::new(KubeEventPublisher::new(kube_client.clone(), CONTROLLER_NAME));

        let (trigger, requeues) = mpsc::unbounded();
        let readiness = ReadinessWatcher::new(cluster.clone(), trigger);
        let reconciler = Reconciler::new(cluster, events, config.clone()).with_readiness(readiness);

        let metrics = Arc::new(Metrics::new()?);
        let context = Arc::new(Context {
            reconciler,
            metrics: Arc::clone(&metrics),
        });

        let metrics_server = {
            let metrics = Arc::clone(&metrics);
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics).await })
        };

        let instance_watcher = tokio::spawn(async move {
            watch_instances(kube_client, &config, context, requeues).await
        });

        Ok(Self {
            instance_watcher,
            metrics_server,
            metrics,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        self.metrics.set_ready(true);
        info!("Instance Controller running");

        // Both tasks are expected to run forever
        tokio::select! {
            result = &mut self.instance_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Instance watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Instance watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
