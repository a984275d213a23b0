//! Prometheus metrics for the synchronization engine
//!
//! Collectors live in the default registry so `/metrics` can expose them with
//! `prometheus::gather()`.

use std::sync::OnceLock;

use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Engine counters and gauges
pub struct Metrics {
    /// Deltas that changed at least one field
    pub deltas_applied: IntCounter,
    /// Deltas that matched a known entity but changed nothing
    pub noop_deltas: IntCounter,
    pub watchdog_timeouts: IntCounter,
    pub reconnects: IntCounter,
    pub active_coordinators: IntGauge,
    pub frames_received: IntCounter,
}

/// Shared metrics, registered on first use
pub fn get() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        deltas_applied: counter("live_sync_deltas_applied_total", "Deltas merged into the store"),
        noop_deltas: counter("live_sync_noop_deltas_total", "Deltas that changed nothing"),
        watchdog_timeouts: counter(
            "live_sync_watchdog_timeouts_total",
            "Subscriptions that never delivered a first payload",
        ),
        reconnects: counter("live_sync_reconnects_total", "Resubscribes after a token rotation"),
        active_coordinators: gauge("live_sync_active_coordinators", "Coordinators holding a subscription"),
        frames_received: counter("live_sync_frames_received_total", "Feed frames received"),
    })
}

fn counter(name: &str, help: &str) -> IntCounter {
    register(IntCounter::with_opts(Opts::new(name, help)).expect("valid counter definition"))
}

fn gauge(name: &str, help: &str) -> IntGauge {
    register(IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge definition"))
}

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    if let Err(e) = prometheus::register(Box::new(collector.clone())) {
        warn!(error = %e, "Metric registration failed");
    }
    collector
}

/// Render every registered metric in the text exposition format
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
