use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use super::utils::{check_required_filename, parse_size};
use crate::collaborators::ExternalToolSettings;
use crate::refine_sv::RefineParameters;
use crate::variant_rewriter::RewriteSettings;

pub const SETTINGS_FILENAME: &str = "refine.settings.json";

/// Subdirectory of the output directory used for per-variant intermediate files
pub const SCRATCH_DIRNAME: &str = "scratch";

#[derive(Args, Deserialize, Serialize)]
pub struct RefineSettings {
    /// Directory for all refinement output (must not already exist, unless --clobber or --resume
    /// are given)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Variant calls to refine, in VCF format, optionally bgzip-compressed
    #[arg(long = "vcf", value_name = "FILE")]
    pub vcf_filename: String,

    /// Genome reference in FASTA format
    #[arg(long = "ref", value_name = "FILE")]
    pub ref_filename: String,

    /// Alignment file with the supporting reads, in BAM or CRAM format. This option may be given
    /// multiple times to search several alignment files.
    #[arg(long = "bam", value_name = "FILE", required = true)]
    pub bam_filenames: Vec<String>,

    /// Resume an earlier run in the same output directory, skipping all variants completed in
    /// that run
    #[arg(long)]
    pub resume: bool,

    /// Refine deletions in addition to insertions
    #[arg(long)]
    pub also_deletions: bool,

    /// INFO field listing the comma-separated names of each variant's supporting reads
    #[arg(long, value_name = "KEY", default_value = "RNAMES")]
    pub rnames_field: String,

    /// Reference flank size on each side of the variant used as the consensus alignment target.
    /// Accepts k/m/g suffixes.
    #[arg(long, value_name = "SIZE", default_value = "100k", value_parser = parse_size)]
    pub genome_buffer: i64,

    /// Reference flank size on each side of the variant used to build the polishing draft.
    /// Accepts k/m/g suffixes.
    #[arg(long, value_name = "SIZE", default_value = "1000", value_parser = parse_size)]
    pub racon_buffer: i64,

    /// Number of racon polishing rounds
    #[arg(long, default_value_t = 1)]
    pub racon_iters: usize,

    /// Build a consensus sequence with falcon_sense instead of polishing a draft with racon
    #[arg(long)]
    pub falconsense: bool,

    /// Align the consensus sequence with ngmlr instead of minimap2
    #[arg(long)]
    pub ngmlr: bool,

    /// Use the minimap2 preset for PacBio reads (map-pb) instead of nanopore reads (map-ont)
    #[arg(long)]
    pub pacbio: bool,

    /// Number of threads used by each aligner process
    #[arg(long, default_value_t = 1)]
    pub alignment_threads: usize,

    /// Minimum length of a refined insertion or deletion
    #[arg(long = "min-ins-length", default_value_t = 30)]
    pub min_length: usize,

    /// Maximum distance between the original and refined variant positions
    #[arg(long = "max-ins-dist", default_value_t = 100)]
    pub max_distance: i64,

    /// Maximum change in variant length from refinement, as a fraction of the original length
    #[arg(long, default_value_t = 0.25)]
    pub max_len_change: f64,

    /// Variants longer than this are dropped from the output. Accepts k/m/g suffixes.
    #[arg(long, value_name = "SIZE", default_value = "100k", value_parser = parse_size)]
    pub max_out_length: i64,

    /// Write variants longer than --max-out-length to the output unchanged instead of dropping
    /// them
    #[arg(long)]
    pub keep_long_variants: bool,

    /// Number of reference bases added before each insertion or deletion allele
    #[arg(long, default_value_t = 1)]
    pub padding_before: i64,

    /// Number of reference bases added after each insertion or deletion allele
    #[arg(long, default_value_t = 0)]
    pub padding_after: i64,

    /// Keep per-variant intermediate files in the output scratch directory
    #[arg(long)]
    pub keep_files: bool,

    #[arg(long, value_name = "PATH", default_value = "minimap2")]
    pub minimap2_path: String,

    #[arg(long, value_name = "PATH", default_value = "ngmlr")]
    pub ngmlr_path: String,

    #[arg(long, value_name = "PATH", default_value = "racon")]
    pub racon_path: String,

    #[arg(long, value_name = "PATH", default_value = "falcon_sense")]
    pub falconsense_path: String,
}

impl RefineSettings {
    pub fn get_refine_parameters(&self) -> RefineParameters {
        RefineParameters {
            genome_buffer: self.genome_buffer,
            racon_buffer: self.racon_buffer,
            min_length: self.min_length,
            max_distance: self.max_distance,
            max_len_change: self.max_len_change,
        }
    }

    pub fn get_rewrite_settings(&self) -> RewriteSettings {
        RewriteSettings {
            padding_before: self.padding_before,
            padding_after: self.padding_after,
            max_out_length: self.max_out_length,
            keep_long_variants: self.keep_long_variants,
        }
    }

    pub fn get_scratch_dir(&self) -> Utf8PathBuf {
        self.output_dir.join(SCRATCH_DIRNAME)
    }

    pub fn get_external_tool_settings(&self) -> ExternalToolSettings {
        let minimap2_preset = if self.pacbio { "map-pb" } else { "map-ont" };
        ExternalToolSettings {
            minimap2_path: self.minimap2_path.clone(),
            ngmlr_path: self.ngmlr_path.clone(),
            racon_path: self.racon_path.clone(),
            falconsense_path: self.falconsense_path.clone(),
            minimap2_preset: minimap2_preset.to_string(),
            alignment_threads: self.alignment_threads,
            scratch_dir: self.get_scratch_dir(),
            keep_files: self.keep_files,
        }
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_refine_settings(settings: RefineSettings) -> SimpleResult<RefineSettings> {
    check_required_filename(&settings.vcf_filename, "variant")?;

    check_required_filename(&settings.ref_filename, "reference")?;

    for bam_filename in settings.bam_filenames.iter() {
        check_required_filename(bam_filename, "alignment")?;
    }

    if settings.alignment_threads == 0 {
        bail!("--alignment-threads argument must be greater than 0");
    }

    if settings.racon_iters == 0 {
        bail!("--racon-iters argument must be greater than 0");
    }

    if settings.genome_buffer == 0 {
        bail!("--genome-buffer argument must be greater than 0");
    }

    if settings.max_len_change < 0.0 {
        bail!("--max-len-change argument can't be negative");
    }

    if settings.max_distance < 0 {
        bail!("--max-ins-dist argument can't be negative");
    }

    if settings.padding_before < 0 || settings.padding_after < 0 {
        bail!("--padding-before and --padding-after arguments can't be negative");
    }

    if settings.rnames_field.is_empty() {
        bail!("--rnames-field argument can't be empty");
    }

    Ok(settings)
}

/// Write refine settings out in json format
pub fn write_refine_settings(output_dir: &Utf8Path, settings: &RefineSettings) {
    use log::info;

    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing refine settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create refine settings json file: '{filename}'"
    );

    unwrap!(
        serde_json::to_writer_pretty(&f, &settings),
        "Unable to write refine settings json file: '{filename}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestSettings {
        #[command(flatten)]
        refine: RefineSettings,
    }

    fn parse_test_settings(args: &[&str]) -> RefineSettings {
        let args = std::iter::once("svrefiner").chain(args.iter().copied());
        TestSettings::try_parse_from(args).unwrap().refine
    }

    #[test]
    fn test_defaults() {
        let settings = parse_test_settings(&["--vcf", "a.vcf", "--ref", "ref.fa", "--bam", "a.bam"]);
        assert_eq!(settings.genome_buffer, 100_000);
        assert_eq!(settings.racon_buffer, 1000);
        assert_eq!(settings.min_length, 30);
        assert_eq!(settings.max_distance, 100);
        assert_eq!(settings.max_len_change, 0.25);
        assert_eq!(settings.max_out_length, 100_000);
        assert_eq!(settings.padding_before, 1);
        assert_eq!(settings.padding_after, 0);
        assert_eq!(settings.rnames_field, "RNAMES");
        assert_eq!(settings.get_external_tool_settings().minimap2_preset, "map-ont");
    }

    #[test]
    fn test_options() {
        let settings = parse_test_settings(&[
            "--vcf",
            "a.vcf",
            "--ref",
            "ref.fa",
            "--bam",
            "a.bam",
            "--bam",
            "b.bam",
            "--genome-buffer",
            "2k",
            "--pacbio",
            "--output-dir",
            "out",
        ]);
        assert_eq!(settings.bam_filenames, vec!["a.bam", "b.bam"]);
        assert_eq!(settings.genome_buffer, 2000);
        let tool_settings = settings.get_external_tool_settings();
        assert_eq!(tool_settings.minimap2_preset, "map-pb");
        assert_eq!(tool_settings.scratch_dir, Utf8PathBuf::from("out/scratch"));
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();
        let filename = dir.path().join("test.vcf").to_str().unwrap().to_string();
        std::fs::write(&filename, "").unwrap();
        let filename = filename.as_str();

        let args = ["--vcf", filename, "--ref", filename, "--bam", filename];
        assert!(validate_and_fix_refine_settings(parse_test_settings(&args)).is_ok());

        let mut settings = parse_test_settings(&args);
        settings.racon_iters = 0;
        assert!(validate_and_fix_refine_settings(settings).is_err());

        let mut settings = parse_test_settings(&args);
        settings.max_len_change = -0.1;
        assert!(validate_and_fix_refine_settings(settings).is_err());

        let mut settings = parse_test_settings(&args);
        settings.bam_filenames.push("missing.bam".to_string());
        assert!(validate_and_fix_refine_settings(settings).is_err());
    }
}
