//! Track stats for the whole svrefiner run
//!

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::refine_sv::SchedulerSummary;
use crate::variant_rewriter::RewriteStats;

pub const RUN_STATS_FILENAME: &str = "run.stats.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RefineStats {
    /// Data records in the input variant file
    pub variant_file_record_count: usize,

    /// Variants of a refinable type with at least one supporting read
    pub selected_variant_count: usize,

    pub processed_variant_count: usize,

    /// Variants skipped because they were completed in an earlier run
    pub resumed_variant_count: usize,

    pub attempted_variant_count: usize,
    pub errored_variant_count: usize,
    pub refined_variant_count: usize,
    pub unrefined_variant_count: usize,

    /// True if refinement stopped early due to a high error rate
    pub stopped_on_errors: bool,

    pub output_record_count: usize,
    pub long_records_dropped: usize,
    pub records_unchanged_on_error: usize,

    pub total_refinement_time_secs: f64,
}

impl RefineStats {
    pub fn new(
        variant_file_record_count: usize,
        selected_variant_count: usize,
        summary: &SchedulerSummary,
        rewrite_stats: &RewriteStats,
    ) -> Self {
        Self {
            variant_file_record_count,
            selected_variant_count,
            processed_variant_count: summary.processed,
            resumed_variant_count: summary.resumed,
            attempted_variant_count: summary.attempted,
            errored_variant_count: summary.errored,
            refined_variant_count: summary.refined,
            unrefined_variant_count: summary.unrefined,
            stopped_on_errors: summary.breaker_tripped,
            output_record_count: rewrite_stats.records_written,
            long_records_dropped: rewrite_stats.records_dropped_long,
            records_unchanged_on_error: rewrite_stats.records_unchanged_on_error,
            total_refinement_time_secs: summary.refinement_time_secs,
        }
    }
}

/// Write run stats out in json format
pub fn write_run_stats(output_dir: &Utf8Path, run_stats: &RefineStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    unwrap!(
        serde_json::to_writer_pretty(&f, &run_stats),
        "Unable to write run statistics json file: '{filename}'"
    );
}
