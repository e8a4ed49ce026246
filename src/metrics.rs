// src/metrics.rs
//! Metric names and one-time descriptions. No exporter is installed here;
//! without a recorder the macros are no-ops.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

pub const POLL_CYCLES: &str = "poll_cycles_total";
pub const POLL_CYCLE_ERRORS: &str = "poll_cycle_errors_total";
pub const DETECTIONS_FETCHED: &str = "detections_fetched_total";
pub const DETECTIONS_APPENDED: &str = "detections_appended_total";
pub const CHECKPOINT_ADVANCED: &str = "checkpoint_advanced_total";
pub const PROVIDER_ERRORS: &str = "provider_errors_total";
pub const CHECKPOINT_TS: &str = "checkpoint_unix_ts";

/// One-time metrics registration (so series carry descriptions).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(POLL_CYCLES, "Poll cycles started.");
        describe_counter!(POLL_CYCLE_ERRORS, "Poll cycles aborted by an error.");
        describe_counter!(DETECTIONS_FETCHED, "Detections returned by the API.");
        describe_counter!(DETECTIONS_APPENDED, "Detections appended to the output log.");
        describe_counter!(CHECKPOINT_ADVANCED, "Checkpoint writes.");
        describe_counter!(PROVIDER_ERRORS, "Non-success responses from token/detections endpoints.");
        describe_gauge!(CHECKPOINT_TS, "Unix ts of the current checkpoint.");
    });
}
