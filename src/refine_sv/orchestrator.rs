//! Refinement of a single variant from its supporting reads
//!

use log::{debug, info};
use simple_error::{SimpleResult, bail};

use super::candidates::CandidateExtractor;
use crate::collaborators::{Aligner, ConsensusBuilder, Polisher, ReadExtractor, ReferenceQuery};
use crate::result_store::RefinedSequence;
use crate::supporting_reads::{SupportedVariant, SupportingReadIndex};
use crate::variant_record::SvType;

/// Algorithm parameters for single variant refinement
#[derive(Clone, Debug)]
pub struct RefineParameters {
    /// Size of the reference flank on each side of the variant used as the alignment target
    pub genome_buffer: i64,

    /// Size of the reference flank on each side of the variant used to build the polishing draft
    pub racon_buffer: i64,

    /// Minimum length of a refined insertion or deletion
    pub min_length: usize,

    /// Maximum distance between the refined and original variant positions
    pub max_distance: i64,

    /// Maximum change in variant length, as a fraction of the original length
    pub max_len_change: f64,
}

/// The method used to produce variant haplotype sequences from the supporting reads
///
pub enum ConsensusSource<'a> {
    /// Assemble consensus sequences from the reads alone
    Assemble(&'a dyn ConsensusBuilder),

    /// Polish a draft haplotype, built from the reference and the original variant sequence
    Polish(&'a dyn Polisher),
}

pub trait VariantRefiner: Sync {
    /// Refine the variant with the given key
    ///
    /// Returns None if no acceptable refinement is found. Errors are specific to this variant.
    ///
    fn refine(&self, key: &str) -> SimpleResult<Option<RefinedSequence>>;
}

pub struct RefinementOrchestrator<'a> {
    params: &'a RefineParameters,
    supporting_reads: &'a SupportingReadIndex,
    reference: &'a dyn ReferenceQuery,
    read_extractor: &'a dyn ReadExtractor,
    consensus_source: ConsensusSource<'a>,
    aligner: &'a dyn Aligner,
    extractor: CandidateExtractor,
}

fn is_alphanumeric(seq: &str) -> bool {
    seq.chars().all(|x| x.is_alphanumeric())
}

impl<'a> RefinementOrchestrator<'a> {
    pub fn new(
        params: &'a RefineParameters,
        supporting_reads: &'a SupportingReadIndex,
        reference: &'a dyn ReferenceQuery,
        read_extractor: &'a dyn ReadExtractor,
        consensus_source: ConsensusSource<'a>,
        aligner: &'a dyn Aligner,
    ) -> Self {
        Self {
            params,
            supporting_reads,
            reference,
            read_extractor,
            consensus_source,
            aligner,
            extractor: CandidateExtractor {
                min_length: params.min_length,
                max_distance: params.max_distance,
            },
        }
    }

    /// Build the polishing draft haplotype for the variant
    ///
    /// Insertions are spliced into the flanking reference, all other types use the reference
    /// segment around the variant.
    ///
    fn get_draft(&self, variant: &SupportedVariant) -> SimpleResult<Vec<u8>> {
        let key = &variant.key;
        let start = std::cmp::max(1, key.pos - self.params.racon_buffer);
        let end = key.pos + self.params.racon_buffer;
        let draft = match variant.sv_type {
            SvType::Insertion => {
                let left = self.reference.substring(&key.chrom, start, key.pos - 1)?;
                let right = self.reference.substring(&key.chrom, key.pos, end)?;
                left + &variant.seq + &right
            }
            SvType::Deletion => self.reference.substring(&key.chrom, start, end)?,
        };
        Ok(draft.into_bytes())
    }

    /// Get the haplotype sequences to align back to the reference, an empty result means that
    /// no refinement is possible
    ///
    fn get_haplotypes(&self, variant: &SupportedVariant) -> SimpleResult<Vec<Vec<u8>>> {
        let key = &variant.key;
        let reads = self.read_extractor.reads(key, &variant.read_names)?;
        debug!("Found {} supporting reads for variant '{key}'", reads.len());

        match self.consensus_source {
            ConsensusSource::Assemble(builder) => builder.consensus(key, &reads),
            ConsensusSource::Polish(polisher) => {
                if !is_alphanumeric(&variant.seq) {
                    info!(
                        "Skipping polishing of variant '{key}' with non-alphanumeric sequence: '{}'",
                        variant.seq
                    );
                    return Ok(Vec::new());
                }
                let draft = self.get_draft(variant)?;
                let polished = polisher.polish(key, &draft, &reads)?;
                if polished.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![polished])
                }
            }
        }
    }

    /// Test whether the refined variant is acceptable
    ///
    /// The refined variant must not be closer to another variant of the same type than to the
    /// original variant, and its length must stay within the allowed fraction of the original
    /// length.
    ///
    fn is_valid_refinement(&self, variant: &SupportedVariant, refined: &RefinedSequence) -> bool {
        let key = &variant.key;
        let record_pos = refined.pos - variant.sv_type.footprint_offset();
        let nearest =
            self.supporting_reads
                .position_index
                .nearest(&key.sv_type, &key.chrom, record_pos);
        if nearest != Some(key.pos) {
            info!(
                "Rejecting refinement of variant '{key}' at position {record_pos}, which is closer to another variant at position {}",
                nearest.unwrap_or(-1)
            );
            return false;
        }

        let original_len = self
            .supporting_reads
            .position_index
            .get_length(&key.sv_type, &key.chrom, key.pos)
            .unwrap_or(variant.length)
            .abs();
        let refined_len = refined.seq.len() as i64;
        let len_change = (refined_len - original_len).abs();
        if len_change as f64 > self.params.max_len_change * original_len as f64 {
            info!(
                "Rejecting refinement of variant '{key}' with length change from {original_len} to {refined_len}"
            );
            return false;
        }
        true
    }

    fn refine_variant(&self, variant: &SupportedVariant) -> SimpleResult<Option<RefinedSequence>> {
        let key = &variant.key;

        let haplotypes = self.get_haplotypes(variant)?;
        if haplotypes.is_empty() {
            info!("No consensus sequence found for variant '{key}'");
            return Ok(None);
        }

        let window = self.reference.window(
            &key.chrom,
            key.pos - self.params.genome_buffer,
            key.pos + self.params.genome_buffer,
        )?;
        let footprint_start = key.pos + variant.sv_type.footprint_offset();
        let expected_offset = footprint_start - window.start;

        let sam = self.aligner.align(key, &haplotypes, &window)?;
        let candidate =
            match self
                .extractor
                .extract_best_from_sam(&sam, expected_offset, variant.sv_type)?
            {
                Some(x) => x,
                None => {
                    info!("No refinement candidate found for variant '{key}'");
                    return Ok(None);
                }
            };

        let refined = RefinedSequence {
            seq: String::from_utf8_lossy(&candidate.seq).to_string(),
            pos: window.start + candidate.ref_pos,
        };
        if !self.is_valid_refinement(variant, &refined) {
            return Ok(None);
        }
        debug!(
            "Refined variant '{key}' to length {} at position {}",
            refined.seq.len(),
            refined.pos
        );
        Ok(Some(refined))
    }
}

impl VariantRefiner for RefinementOrchestrator<'_> {
    fn refine(&self, key: &str) -> SimpleResult<Option<RefinedSequence>> {
        let variant = match self.supporting_reads.get(key) {
            Some(x) => x,
            None => bail!("No supporting read entry for variant '{key}'"),
        };
        self.refine_variant(variant)
    }
}
