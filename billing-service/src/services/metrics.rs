//! Metrics collection and Prometheus export.
//!
//! Business metrics are emitted through the `metrics` facade; the Prometheus
//! recorder installed here renders them on `/metrics`.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use salon_core::error::AppError;
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() -> Result<(), AppError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))
    })?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Count a checkout attempt by outcome (`completed`, `already_completed`,
/// `rejected`, `conflict`, `error`).
pub fn record_checkout(branch_id: &str, outcome: &'static str) {
    counter!(
        "salon_checkouts_total",
        "branch_id" => branch_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the final amount of a completed checkout.
pub fn record_checkout_amount(branch_id: &str, amount: f64) {
    histogram!("salon_checkout_amount", "branch_id" => branch_id.to_string()).record(amount);
}

/// Count a product falling to or below its minimum stock level.
pub fn record_low_stock(branch_id: &str, product_id: &str) {
    counter!(
        "salon_low_stock_total",
        "branch_id" => branch_id.to_string(),
        "product_id" => product_id.to_string()
    )
    .increment(1);
}
