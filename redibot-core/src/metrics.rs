// ABOUTME: Prometheus metrics for commands, errors, replies, and live subscriptions
// ABOUTME: Thin helpers over the metrics facade; the recorder is installed once per process

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Mutex;

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the global Prometheus recorder and return a render handle.
///
/// Safe to call more than once; later calls return the first handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    // Held across the install so concurrent callers never install twice
    let mut slot = HANDLE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    *slot = Some(handle.clone());
    Ok(handle)
}

/// A chat command was routed
pub fn record_command(verb: &str) {
    metrics::counter!("redibot_commands_total", "verb" => verb.to_string()).increment(1);
}

/// Something went wrong; `kind` is a short snake_case label
pub fn record_error(kind: &str) {
    metrics::counter!("redibot_errors_total", "kind" => kind.to_string()).increment(1);
}

/// A reply was posted to the transport
pub fn record_reply() {
    metrics::counter!("redibot_replies_total").increment(1);
}

pub fn subscription_opened() {
    metrics::gauge!("redibot_subscriptions_active").increment(1.0);
}

pub fn subscription_closed() {
    metrics::gauge!("redibot_subscriptions_active").decrement(1.0);
}

pub fn set_endpoints_registered(count: usize) {
    metrics::gauge!("redibot_endpoints_registered").set(count as f64);
}
