//! A module for setting up metrics in the APP
//!

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// The buckets used for metric histograms
const METRIC_BUCKETS: [f64; 9] = [1e-4, 1e-3, 1e-2, 0.1, 0.5, 1.0, 5.0, 20.0, f64::INFINITY];

/// The quantiles to use when rendering histograms
const METRIC_QUANTILES: [f64; 8] = [0.0, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99, 1.0];

/// The metric for the total number of deposits staged from SPV. This
/// does not include redeliveries, which are dropped before staging.
pub const DEPOSITS_STAGED_TOTAL: &str = "deposits_staged_total";

/// The metric for the total number of withdraw transactions staged from
/// side-chain polling.
pub const WITHDRAWALS_STAGED_TOTAL: &str = "withdrawals_staged_total";

/// The total number of feedback signatures merged into in-flight
/// proposals.
pub const SIGNATURES_MERGED_TOTAL: &str = "signatures_merged_total";

/// The total number of proposals that reached threshold and were
/// submitted to a chain.
pub const PROPOSALS_SUBMITTED_TOTAL: &str = "proposals_submitted_total";

/// Set up a prometheus exporter for metrics.
pub fn setup_metrics(prometheus_exporter_endpoint: Option<SocketAddr>) {
    if let Some(addr) = prometheus_exporter_endpoint {
        let result = PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("app", env!("CARGO_PKG_NAME"))
            .set_buckets(&METRIC_BUCKETS)
            .and_then(|builder| builder.set_quantiles(&METRIC_QUANTILES))
            .and_then(|builder| builder.install());
        if let Err(error) = result {
            tracing::error!(%error, "could not install the prometheus exporter");
        }
    }

    metrics::gauge!(
        "build_info",
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}
