//! Prometheus exporter.
//!
//! Engine metrics are described by
//! [`register_business_metrics`](marquee_engine::metrics::register_business_metrics);
//! this module adds the transport gauges and serves everything on a separate
//! listener.
//!
//! ## Gauges
//! - `marquee_ws_connections` - Open WebSocket connections

use axum::{Router, routing::get};
use metrics::describe_gauge;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Install the global recorder.
///
/// # Errors
///
/// Returns error if a recorder is already installed or the buckets are invalid.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install_recorder()?;

    marquee_engine::metrics::register_business_metrics();
    describe_gauge!("marquee_ws_connections", "Open WebSocket connections");
    Ok(handle)
}

/// Record the open WebSocket count.
#[allow(clippy::cast_precision_loss)]
pub fn record_ws_connections(count: usize) {
    metrics::gauge!("marquee_ws_connections").set(count as f64);
}

/// Router exposing `GET /metrics`.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

/// Serve metrics until shutdown is signalled.
pub fn spawn_metrics_server(
    listener: TcpListener,
    handle: PrometheusHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(address) = listener.local_addr() {
            info!(address = %address, "Prometheus metrics available at /metrics");
        }
        let result = axum::serve(listener, metrics_router(handle))
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Metrics server failed");
        }
    })
}
