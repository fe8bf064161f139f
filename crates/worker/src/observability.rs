use std::sync::OnceLock;

use anyhow::Result;
use chatrank_domain::rollover::RolloverReport;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const ROLLOVER_RUNS_TOTAL: &str = "chatrank_worker_rollover_runs_total";
const ROLLOVER_DURATION_MS: &str = "chatrank_worker_rollover_duration_ms";
const BADGE_ROTATION_FAILURES_TOTAL: &str = "chatrank_worker_badge_rotation_failures_total";
const NEXT_FIRE_GAUGE: &str = "chatrank_worker_next_fire_unix_seconds";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_rollover_run(outcome: &'static str, duration_ms: f64) {
    counter!(ROLLOVER_RUNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(ROLLOVER_DURATION_MS, "outcome" => outcome).record(duration_ms.max(0.0));
}

pub fn register_rotation_failures(report: &RolloverReport) {
    let RolloverReport::Completed {
        rotation: Some(rotation),
        ..
    } = report
    else {
        return;
    };
    if rotation.listing_error.is_some() {
        counter!(BADGE_ROTATION_FAILURES_TOTAL, "step" => "list").increment(1);
    }
    let failed = rotation.failed_removals().len() as u64;
    if failed > 0 {
        counter!(BADGE_ROTATION_FAILURES_TOTAL, "step" => "remove").increment(failed);
    }
    if rotation.is_degraded() {
        counter!(BADGE_ROTATION_FAILURES_TOTAL, "step" => "grant").increment(1);
    }
}

pub fn set_next_fire(unix_seconds: i64) {
    gauge!(NEXT_FIRE_GAUGE).set(unix_seconds as f64);
}
