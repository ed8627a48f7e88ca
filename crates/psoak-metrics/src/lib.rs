//! ---
//! psoak_section: "03-observability"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Metrics registry, exposition helpers, and harness metric families."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::debug;

/// Shared registry type used across the harness.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in the registry using the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics registry")
}

/// Find the first sample of `name` in Prometheus exposition text.
///
/// Labelled and unlabelled samples both match; comment lines are skipped.
/// Returns `None` when the metric is absent or its value does not parse.
pub fn parse_sample(exposition: &str, name: &str) -> Option<f64> {
    for line in exposition.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        let value_part = if let Some(labelled) = rest.strip_prefix('{') {
            match labelled.split_once('}') {
                Some((_, tail)) => tail,
                None => continue,
            }
        } else if rest.starts_with(char::is_whitespace) {
            rest
        } else {
            // a longer metric name sharing this prefix
            continue;
        };
        let Some(raw) = value_part.split_whitespace().next() else {
            continue;
        };
        match raw.parse::<f64>() {
            Ok(value) => return Some(value),
            Err(_) => {
                debug!(metric = name, raw, "ignoring unparsable sample value");
                return None;
            }
        }
    }
    None
}

/// Metrics recorded by the workload orchestrator.
#[derive(Clone, Debug)]
pub struct HarnessMetrics {
    registry: SharedRegistry,
    phase_duration_seconds: HistogramVec,
    operations_total: IntCounterVec,
    expected_shards: IntGauge,
}

impl HarnessMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let buckets = prometheus::exponential_buckets(0.001, 2.0, 20)
            .context("failed to construct histogram buckets")?;
        let phase_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "psoak_phase_duration_seconds",
                "Wall-clock time spent in each scenario phase",
            )
            .buckets(buckets),
            &["phase"],
        )?;
        registry.register(Box::new(phase_duration_seconds.clone()))?;

        let operations_total = IntCounterVec::new(
            Opts::new(
                "psoak_operations_total",
                "Operations dispatched against the controller by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let expected_shards = IntGauge::with_opts(Opts::new(
            "psoak_expected_shards",
            "Shard count the harness expects the controller to hold",
        ))?;
        registry.register(Box::new(expected_shards.clone()))?;

        Ok(Self {
            registry,
            phase_duration_seconds,
            operations_total,
            expected_shards,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_phase(&self, phase: &str, elapsed: Duration) {
        self.phase_duration_seconds
            .with_label_values(&[phase])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_operation(&self, kind: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn set_expected_shards(&self, count: usize) {
        self.expected_shards.set(count as i64);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    const EXPOSITION: &str = "\
# HELP process_resident_memory_bytes Resident memory size in bytes.
# TYPE process_resident_memory_bytes gauge
process_resident_memory_bytes 1.2345e8
process_resident_memory_bytes_peak 9e9
storage_controller_reconcile_complete_total{status=\"ok\"} 42
";

    #[test]
    fn parse_sample_reads_plain_and_labelled_values() {
        assert_eq!(
            parse_sample(EXPOSITION, "process_resident_memory_bytes"),
            Some(1.2345e8)
        );
        assert_eq!(
            parse_sample(EXPOSITION, "storage_controller_reconcile_complete_total"),
            Some(42.0)
        );
        assert_eq!(parse_sample(EXPOSITION, "process_virtual_memory_bytes"), None);
    }

    #[test]
    fn harness_metrics_are_rendered() {
        let registry = new_registry();
        let metrics = HarnessMetrics::new(registry.clone()).unwrap();
        metrics.observe_phase("bulk_create", Duration::from_millis(20));
        metrics.record_operation("migrate", true);
        metrics.set_expected_shards(8001);

        let text = encode_text(&registry).unwrap();
        assert_eq!(parse_sample(&text, "psoak_expected_shards"), Some(8001.0));
        assert!(text.contains("psoak_operations_total{kind=\"migrate\",outcome=\"success\"} 1"));
        assert!(text.contains("psoak_phase_duration_seconds_count{phase=\"bulk_create\"} 1"));
    }
}
