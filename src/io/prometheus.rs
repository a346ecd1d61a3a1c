//! Prometheus text exposition for gateway metrics
//!
//! Served by the HTTP API at /metrics.

use crate::infra::metrics::{Metrics, MetricsSummary, CONFIDENCE_BUCKET_BOUNDS, CONFIDENCE_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a counter family split by one label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram with cumulative buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; CONFIDENCE_NUM_BUCKETS],
    bounds: &[u64; CONFIDENCE_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_submission_metrics(&mut output, site_id, &summary);
    write_occupancy_metrics(&mut output, site_id, &summary);
    write_persist_metrics(&mut output, site_id, &summary);

    output
}

fn write_submission_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "presence_submissions_total",
        "Entry/exit submissions received",
        MetricType::Counter,
        site,
        summary.submissions_total,
    );
    write_labeled_counter(
        output,
        "presence_decisions_total",
        "Scored submissions by decision",
        site,
        "decision",
        &[
            ("auto_accepted", summary.accepted_auto_total),
            ("manual_confirmed", summary.accepted_manual_total),
            ("borderline", summary.rejected_borderline_total),
            ("too_low", summary.rejected_low_total),
        ],
    );
    write_metric(
        output,
        "presence_validation_errors_total",
        "Submissions rejected as malformed",
        MetricType::Counter,
        site,
        summary.validation_errors_total,
    );
    write_histogram(
        output,
        "presence_confidence",
        "Total confidence of scored submissions",
        site,
        &summary.confidence_buckets,
        &CONFIDENCE_BUCKET_BOUNDS,
        summary.confidence_sum,
    );
}

fn write_occupancy_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "presence_occupancy",
        "Subjects currently inside",
        MetricType::Gauge,
        site,
        summary.occupancy,
    );
    write_metric(
        output,
        "presence_occupancy_noops_total",
        "Accepted events that left the roster unchanged",
        MetricType::Counter,
        site,
        summary.occupancy_noops_total,
    );
}

fn write_persist_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "presence_events_persisted_total",
        "Accepted events written to the event log",
        MetricType::Counter,
        site,
        summary.events_persisted_total,
    );
    write_metric(
        output,
        "presence_persist_retries_total",
        "Event log append retries",
        MetricType::Counter,
        site,
        summary.persist_retries_total,
    );
    write_metric(
        output,
        "presence_persist_failures_total",
        "Events given up on after all retries",
        MetricType::Counter,
        site,
        summary.persist_failures_total,
    );
    write_metric(
        output,
        "presence_persist_deferred_total",
        "Events that waited for persistence channel capacity",
        MetricType::Counter,
        site,
        summary.persist_deferred_total,
    );
    write_metric(
        output,
        "presence_persist_dropped_total",
        "Events dropped before reaching the persistence worker",
        MetricType::Counter,
        site,
        summary.persist_dropped_total,
    );
}
