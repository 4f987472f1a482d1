//! Probes and Prometheus metrics.
//!
//! Serves `/healthz`, `/readyz` and `/metrics` on the configured address.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// Reconciliations started.
pub const RECONCILES_TOTAL: &str = "instance_reconciles_total";
/// Reconciliations that returned an error.
pub const RECONCILE_ERRORS_TOTAL: &str = "instance_reconcile_errors_total";
/// Reconciliation latency.
pub const RECONCILE_DURATION: &str = "instance_reconcile_duration_seconds";

/// Controller metrics and readiness state.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounter,
    reconcile_errors: IntCounter,
    reconcile_duration: Histogram,
    ready: AtomicBool,
}

impl Metrics {
    /// Create and register the controller metrics.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconciles = IntCounter::new(RECONCILES_TOTAL, "Total Instance reconciliations")?;
        let reconcile_errors =
            IntCounter::new(RECONCILE_ERRORS_TOTAL, "Total failed Instance reconciliations")?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(RECONCILE_DURATION, "Duration of Instance reconciliations")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(reconcile_errors.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconciles,
            reconcile_errors,
            reconcile_duration,
            ready: AtomicBool::new(false),
        })
    }

    /// Record the outcome of one reconciliation.
    pub fn observe_reconcile(&self, elapsed: Duration, failed: bool) {
        self.reconciles.inc();
        if failed {
            self.reconcile_errors.inc();
        }
        self.reconcile_duration.observe(elapsed.as_secs_f64());
    }

    /// Flip the readiness probe once the controller loop is running.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Whether the readiness probe should pass.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::InvalidResource(format!("non UTF-8 metrics: {}", e)))
    }
}

/// Build the probes/metrics router.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

/// Serve the probes/metrics router until the process exits.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving probes and metrics on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Watch(format!("metrics server failed: {}", e)))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(metrics): State<Arc<Metrics>>) -> StatusCode {
    if metrics.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
