//! Tracing bootstrap and federated-learning metrics.

use anyhow::Result;
use once_cell::sync::{Lazy, OnceCell};
use opentelemetry::metrics::{Counter, Histogram, Meter};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

static FED_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("fedledger"));

pub struct FedMetrics {
    pub submissions_total: Counter<u64>,
    pub aggregations_total: Counter<u64>,
    pub aggregation_failures_total: Counter<u64>,
    pub aggregation_latency_ms: Histogram<f64>,
}

pub static FED_METRICS: Lazy<FedMetrics> = Lazy::new(|| FedMetrics {
    submissions_total: FED_METER.u64_counter("fl_submissions_total").with_description("Parameter submissions committed").build(),
    aggregations_total: FED_METER.u64_counter("fl_aggregations_total").with_description("Round aggregates written").build(),
    aggregation_failures_total: FED_METER.u64_counter("fl_aggregation_failures_total").with_description("Quorum reached but aggregation failed").build(),
    aggregation_latency_ms: FED_METER.f64_histogram("fl_aggregation_latency_ms").with_description("Aggregation latency ms").with_unit("ms").build(),
});

/// Install the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `FEDLEDGER_JSON_LOG=1|true` switches to JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("FEDLEDGER_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;
        let json_layer = json.then(|| fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false));
        let text_layer = (!json).then(|| fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true));
        tracing_subscriber::registry().with(env_filter).with(json_layer).with(text_layer).try_init()?;
        Ok(())
    })?;
    info!(target: "fedledger", %service, "tracing initialized");
    Ok(())
}
