//! Transfer engine metrics
//!
//! Counters are recorded through the `metrics` facade; nothing is exported
//! unless the embedding application installs a recorder.

use metrics::{counter, describe_counter};

/// Metric names as constants
pub mod names {
    pub const SHARDS_TRANSFERRED: &str = "genaro_shards_transferred_total";
    pub const SHARD_FAILURES: &str = "genaro_shard_failures_total";
    pub const POINTER_REPLACEMENTS: &str = "genaro_pointer_replacements_total";
    pub const SHARDS_RECONSTRUCTED: &str = "genaro_shards_reconstructed_total";
    pub const EXCHANGE_REPORTS: &str = "genaro_exchange_reports_total";
}

/// Initialize metric descriptions
pub fn init_metrics() {
    describe_counter!(names::SHARDS_TRANSFERRED, "Shards moved to or from farmers");
    describe_counter!(names::SHARD_FAILURES, "Failed shard transfer attempts");
    describe_counter!(names::POINTER_REPLACEMENTS, "Replacement farmers obtained from the bridge");
    describe_counter!(names::SHARDS_RECONSTRUCTED, "Data shards rebuilt from parity");
    describe_counter!(names::EXCHANGE_REPORTS, "Exchange reports posted to the bridge");
}

pub fn shard_transferred(direction: &'static str) {
    counter!(names::SHARDS_TRANSFERRED, "direction" => direction).increment(1);
}

pub fn shard_failed(direction: &'static str) {
    counter!(names::SHARD_FAILURES, "direction" => direction).increment(1);
}

pub fn pointer_replaced() {
    counter!(names::POINTER_REPLACEMENTS).increment(1);
}

pub fn shards_reconstructed(count: usize) {
    counter!(names::SHARDS_RECONSTRUCTED).increment(count as u64);
}

pub fn report_sent(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(names::EXCHANGE_REPORTS, "result" => result).increment(1);
}
