//! Interfaces to the reference, alignment files and external sequence tools used for refinement
//!
//! Each interface is a trait so that the refinement logic can run against any implementation.
//! All implementations must be shareable across the refinement worker threads.
//!

mod aligner;
mod bam_reads;
mod consensus;
mod external_tools;

pub use aligner::ExternalAligner;
pub use bam_reads::BamReadExtractor;
pub use consensus::{FalconSense, Racon};
pub use external_tools::ExternalToolSettings;

use simple_error::SimpleResult;

use crate::variant_record::VariantKey;

/// A segment of the reference genome
///
pub struct ReferenceWindow {
    pub chrom: String,

    /// 1-based position of the first base in `seq`
    pub start: i64,

    pub seq: Vec<u8>,
}

pub trait ReferenceQuery: Sync {
    /// Get the reference sequence from `start` to `end`, using 1-based inclusive coordinates
    ///
    /// An empty sequence is returned if `start` is greater than `end`, and `end` is clamped to
    /// the chromosome length. Unknown chromosomes and start positions past the chromosome end are
    /// errors.
    ///
    fn substring(&self, chrom: &str, start: i64, end: i64) -> SimpleResult<String>;

    /// Get the reference window from `start` to `end`, see [Self::substring]
    fn window(&self, chrom: &str, start: i64, end: i64) -> SimpleResult<ReferenceWindow> {
        let start = std::cmp::max(start, 1);
        let seq = self.substring(chrom, start, end)?.into_bytes();
        Ok(ReferenceWindow {
            chrom: chrom.to_string(),
            start,
            seq,
        })
    }
}

pub trait ReadExtractor: Sync {
    /// Get the sequences of the named reads near the variant, in original read orientation
    ///
    fn reads(&self, key: &VariantKey, read_names: &[String]) -> SimpleResult<Vec<Vec<u8>>>;
}

pub trait ConsensusBuilder: Sync {
    /// Assemble consensus sequences from the variant's supporting reads, which may be empty
    fn consensus(&self, key: &VariantKey, reads: &[Vec<u8>]) -> SimpleResult<Vec<Vec<u8>>>;
}

pub trait Polisher: Sync {
    /// Polish a draft sequence with the variant's supporting reads
    fn polish(&self, key: &VariantKey, draft: &[u8], reads: &[Vec<u8>]) -> SimpleResult<Vec<u8>>;
}

pub trait Aligner: Sync {
    /// Align query sequences to a reference window, returning the alignments in SAM format
    ///
    /// Alignment positions are relative to the start of `window`.
    ///
    fn align(
        &self,
        key: &VariantKey,
        queries: &[Vec<u8>],
        window: &ReferenceWindow,
    ) -> SimpleResult<String>;
}
