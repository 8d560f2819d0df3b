//! Top-level refinement workflow: index the input variants, refine each variant from its
//! supporting reads, then write the refined variant file
//!

use camino::Utf8Path;
use itertools::Itertools;
use log::info;
use unwrap::unwrap;

use crate::cli::{RefineSettings, SharedSettings, write_refine_settings};
use crate::collaborators::{
    Aligner, BamReadExtractor, ExternalAligner, FalconSense, Racon, ReadExtractor, ReferenceQuery,
};
use crate::genome_ref::get_genome_ref_from_fasta;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::os_utils::create_dir_all;
use crate::refine_sv::{
    ConsensusSource, RefineParameters, RefinementOrchestrator, refine_variants,
};
use crate::result_store::ResultStore;
use crate::run_stats::{RefineStats, write_run_stats};
use crate::supporting_reads::SupportingReadIndex;
use crate::variant_rewriter::{RewriteSettings, VariantRewriter, rewrite_variant_file};

pub const REFINED_VCF_FILENAME: &str = "refined.vcf";
pub const RESULTS_TABLE_FILENAME: &str = "results.tsv";
pub const RESULT_STORE_FILENAME: &str = "resultsstore.txt";

/// Sources of reference sequence, reads, consensus and alignment used by the workflow
pub struct Collaborators<'a> {
    pub reference: &'a dyn ReferenceQuery,
    pub read_extractor: &'a dyn ReadExtractor,
    pub consensus_source: ConsensusSource<'a>,
    pub aligner: &'a dyn Aligner,
}

/// Settings for one workflow run which don't depend on the collaborator implementations
pub struct WorkflowSettings<'a> {
    pub output_dir: &'a Utf8Path,
    pub vcf_filename: &'a str,
    pub thread_count: usize,
    pub resume: bool,
    pub params: RefineParameters,
    pub rewrite_settings: RewriteSettings,
    pub extra_header_lines: Vec<String>,
}

/// VCF header lines describing this program and its command line
fn get_extra_header_lines() -> Vec<String> {
    vec![
        format!("##source={PROGRAM_NAME}-{PROGRAM_VERSION}"),
        format!(
            "##{PROGRAM_NAME}Command={}",
            std::env::args().join(" ")
        ),
    ]
}

/// Refine all variants with supporting reads and write the refined variant file
///
pub fn run_refinement_workflow(
    settings: &WorkflowSettings,
    supporting_reads: &SupportingReadIndex,
    collaborators: Collaborators,
) -> RefineStats {
    let store_filename = settings.output_dir.join(RESULT_STORE_FILENAME);
    let store = unwrap!(
        ResultStore::open(&store_filename, settings.resume),
        "Unable to open result store: '{store_filename}'"
    );

    let orchestrator = RefinementOrchestrator::new(
        &settings.params,
        supporting_reads,
        collaborators.reference,
        collaborators.read_extractor,
        collaborators.consensus_source,
        collaborators.aligner,
    );

    let keys = supporting_reads.refinement_keys();
    let (refinements, summary) = refine_variants(
        &keys,
        settings.thread_count,
        settings.resume,
        &orchestrator,
        &store,
    );

    let rewriter = VariantRewriter::new(
        &settings.rewrite_settings,
        collaborators.reference,
        &refinements,
        settings.extra_header_lines.clone(),
    );
    let rewrite_stats = rewrite_variant_file(
        &rewriter,
        settings.vcf_filename,
        &settings.output_dir.join(REFINED_VCF_FILENAME),
        &settings.output_dir.join(RESULTS_TABLE_FILENAME),
    );

    info!(
        "Total number of variants with errors: {} out of {}",
        summary.errored, summary.processed
    );
    RefineStats::new(
        supporting_reads.record_count,
        keys.len(),
        &summary,
        &rewrite_stats,
    )
}

pub fn run_refine(shared_settings: &SharedSettings, settings: &RefineSettings) {
    let output_dir = settings.output_dir.as_path();
    write_refine_settings(output_dir, settings);
    create_dir_all(&settings.get_scratch_dir(), "scratch");

    let supporting_reads = SupportingReadIndex::from_vcf(
        &settings.vcf_filename,
        &settings.rnames_field,
        settings.also_deletions,
    );
    let reference = get_genome_ref_from_fasta(&settings.ref_filename);

    let tool_settings = settings.get_external_tool_settings();
    let read_extractor = BamReadExtractor::new(
        &settings.bam_filenames,
        Some(settings.ref_filename.as_str()),
        shared_settings.thread_count,
    );
    let aligner = ExternalAligner::new(settings.ngmlr, &tool_settings);
    let falconsense = FalconSense::new(&tool_settings);
    let racon = Racon::new(&tool_settings, settings.racon_iters);
    let consensus_source = if settings.falconsense {
        ConsensusSource::Assemble(&falconsense)
    } else {
        ConsensusSource::Polish(&racon)
    };

    let workflow_settings = WorkflowSettings {
        output_dir,
        vcf_filename: &settings.vcf_filename,
        thread_count: shared_settings.thread_count,
        resume: settings.resume,
        params: settings.get_refine_parameters(),
        rewrite_settings: settings.get_rewrite_settings(),
        extra_header_lines: get_extra_header_lines(),
    };
    let collaborators = Collaborators {
        reference: &reference,
        read_extractor: &read_extractor,
        consensus_source,
        aligner: &aligner,
    };
    let run_stats = run_refinement_workflow(&workflow_settings, &supporting_reads, collaborators);
    write_run_stats(output_dir, &run_stats);

    info!(
        "Refinement completed - output is in '{}'",
        output_dir.join(REFINED_VCF_FILENAME)
    );
}
