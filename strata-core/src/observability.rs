/*!
Observability for the Strata engine.

- Structured logging through `tracing`, installed by [`init_observability`]
- Prometheus metrics behind the `metrics` feature

The `record_*` functions are always available and compile to nothing without the
`metrics` feature, so call sites need no feature gates.
*/

#[cfg(feature = "metrics")]
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, StrataError};

/// Default log directive when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "strata=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<StrataMetrics>> = OnceLock::new();

/// Metrics collection for Strata operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StrataMetrics {
    pub snapshots_taken_total: IntCounter,
    pub snapshots_deleted_total: IntCounter,
    /// Sub-job outcomes, labelled `succeeded`, `aborted`, `failed` or `retried`
    pub sub_jobs_total: IntCounterVec,
    pub copy_latency_seconds: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl StrataMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();
        let metric_error =
            |name: &str, e: prometheus::Error| StrataError::storage(format!("Failed to create {name} metric: {e}"));

        let snapshots_taken_total = IntCounter::new(
            "strata_snapshots_taken_total",
            "Snapshots taken since start",
        )
        .map_err(|e| metric_error("snapshots_taken_total", e))?;

        let snapshots_deleted_total = IntCounter::new(
            "strata_snapshots_deleted_total",
            "Snapshot versions deleted since start",
        )
        .map_err(|e| metric_error("snapshots_deleted_total", e))?;

        let sub_jobs_total = IntCounterVec::new(
            Opts::new("strata_migration_sub_jobs_total", "Migration sub-job attempts by outcome"),
            &["outcome"],
        )
        .map_err(|e| metric_error("sub_jobs_total", e))?;

        let copy_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "strata_copy_latency_seconds",
            "Duration of verified payload copies between tiers",
        ))
        .map_err(|e| metric_error("copy_latency_seconds", e))?;

        registry
            .register(Box::new(snapshots_taken_total.clone()))
            .map_err(|e| metric_error("snapshots_taken_total", e))?;
        registry
            .register(Box::new(snapshots_deleted_total.clone()))
            .map_err(|e| metric_error("snapshots_deleted_total", e))?;
        registry
            .register(Box::new(sub_jobs_total.clone()))
            .map_err(|e| metric_error("sub_jobs_total", e))?;
        registry
            .register(Box::new(copy_latency_seconds.clone()))
            .map_err(|e| metric_error("copy_latency_seconds", e))?;

        Ok(Self {
            snapshots_taken_total,
            snapshots_deleted_total,
            sub_jobs_total,
            copy_latency_seconds,
            registry,
        })
    }

    /// Global metrics instance; `None` if the registry could not be built
    pub fn global() -> Option<&'static StrataMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| StrataError::storage(format!("Failed to encode metrics: {e}")))
    }
}

#[cfg(feature = "metrics")]
fn with_metrics<F: FnOnce(&StrataMetrics)>(f: F) {
    if let Some(metrics) = StrataMetrics::global() {
        f(metrics);
    }
}

pub fn record_snapshot_taken() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.snapshots_taken_total.inc());
}

pub fn record_snapshots_deleted(count: usize) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.snapshots_deleted_total.inc_by(count as u64));
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

pub fn record_sub_job(outcome: &str) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.sub_jobs_total.with_label_values(&[outcome]).inc());
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

pub fn record_copy_latency(duration: Duration) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.copy_latency_seconds.observe(duration.as_secs_f64()));
    #[cfg(not(feature = "metrics"))]
    let _ = duration;
}

/// Metrics in Prometheus text format; empty without the `metrics` feature
pub fn gather_metrics() -> Result<String> {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = StrataMetrics::global() {
        return metrics.gather_metrics();
    }
    Ok(String::new())
}

/// Install the global tracing subscriber
///
/// Log levels come from `RUST_LOG`, falling back to [`DEFAULT_LOG_DIRECTIVE`].
/// With `json` set, every event is written as one JSON object per line.
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with_directive(json, DEFAULT_LOG_DIRECTIVE)
}

/// Like [`init_observability`] with a caller supplied fallback directive
pub fn init_observability_with_directive(json: bool, fallback: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _ = StrataMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| StrataError::validation(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(false),
        );
        set_global_default(subscriber)
    } else {
        let subscriber = TracingRegistry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false));
        set_global_default(subscriber)
    };
    result.map_err(|e| StrataError::storage(format!("Failed to set global tracing subscriber: {e}")))?;

    tracing::debug!("Strata observability initialized");
    Ok(())
}

/// Initialize observability with human-readable output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
