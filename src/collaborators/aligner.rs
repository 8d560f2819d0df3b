use camino::Utf8Path;
use simple_error::{SimpleResult, try_with};

use super::external_tools::{
    ExternalToolSettings, ScratchFiles, run_command, write_fasta, write_single_fasta,
};
use super::{Aligner, ReferenceWindow};
use crate::variant_record::VariantKey;

#[derive(Clone, Copy, Debug, PartialEq)]
enum AlignerTool {
    Minimap2,
    Ngmlr,
}

/// Sequence aligner run as an external minimap2 or ngmlr process
///
pub struct ExternalAligner {
    tool: AlignerTool,
    settings: ExternalToolSettings,
}

impl ExternalAligner {
    pub fn new(use_ngmlr: bool, settings: &ExternalToolSettings) -> Self {
        let tool = if use_ngmlr {
            AlignerTool::Ngmlr
        } else {
            AlignerTool::Minimap2
        };
        Self {
            tool,
            settings: settings.clone(),
        }
    }

    pub fn minimap2(settings: &ExternalToolSettings) -> Self {
        Self::new(false, settings)
    }

    /// Align sequences in the query fasta file to the target fasta file, writing SAM output
    ///
    pub fn align_files(
        &self,
        target_filename: &Utf8Path,
        query_filename: &Utf8Path,
        output_filename: &Utf8Path,
    ) -> SimpleResult<()> {
        let threads = self.settings.alignment_threads.to_string();
        match self.tool {
            AlignerTool::Minimap2 => run_command(
                &self.settings.minimap2_path,
                &[
                    "-x",
                    &self.settings.minimap2_preset,
                    "-L",
                    "-c",
                    "-a",
                    "-t",
                    &threads,
                    target_filename.as_str(),
                    query_filename.as_str(),
                    "-o",
                    output_filename.as_str(),
                ],
                None,
                None,
            ),
            AlignerTool::Ngmlr => run_command(
                &self.settings.ngmlr_path,
                &[
                    "-t",
                    &threads,
                    "-r",
                    target_filename.as_str(),
                    "-q",
                    query_filename.as_str(),
                    "-o",
                    output_filename.as_str(),
                ],
                None,
                None,
            ),
        }
    }
}

impl Aligner for ExternalAligner {
    fn align(
        &self,
        key: &VariantKey,
        queries: &[Vec<u8>],
        window: &ReferenceWindow,
    ) -> SimpleResult<String> {
        let mut scratch =
            ScratchFiles::new(&self.settings.scratch_dir, &key.to_string(), self.settings.keep_files);
        let query_filename = scratch.path("align.query.fa");
        let target_filename = scratch.path("align.region.fa");
        let output_filename = scratch.path("align.sam");
        if self.tool == AlignerTool::Ngmlr {
            // ngmlr writes its reference index next to the reference file
            scratch.path("align.region.fa-enc.2.ngm");
            scratch.path("align.region.fa-ht-13-2.2.ngm");
        }

        let queries = queries.iter().map(|x| x.as_slice()).collect::<Vec<_>>();
        write_fasta(&query_filename, "consensus", &queries)?;
        write_single_fasta(&target_filename, &window.chrom, &window.seq)?;

        self.align_files(&target_filename, &query_filename, &output_filename)?;

        let sam = try_with!(
            std::fs::read_to_string(&output_filename),
            "Unable to read aligner output for variant '{key}': '{output_filename}'"
        );
        Ok(sam)
    }
}
