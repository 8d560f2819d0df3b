//! Find the best insertion or deletion in the consensus-to-reference alignments of one variant
//!

use std::collections::HashMap;

use rust_htslib::bam::record::Cigar;
use simple_error::{SimpleResult, bail};

use crate::bam_utils::{AlignmentRecord, parse_sam_records, update_ref_and_read_pos};
use crate::variant_record::SvType;

/// Insertion lengths within this distance of a candidate's length contribute to its popularity
const LENGTH_POPULARITY_WINDOW: usize = 10;

const INSERTION_LENGTH_WEIGHT: i64 = 20;

/// Deleted bases aren't observed in the query, so deletion candidates carry this base repeated
/// over the deletion length
const DELETION_FILLER_BASE: u8 = b'A';

/// An insertion or deletion found in a consensus alignment
///
/// `ref_pos` is the 0-based offset into the aligned reference window of the first reference base
/// after the insertion point, or the first deleted base.
///
#[derive(Clone, Debug, PartialEq)]
pub struct RefinementCandidate {
    pub seq: Vec<u8>,
    pub ref_pos: i64,
}

impl RefinementCandidate {
    fn distance(&self, expected_offset: i64) -> i64 {
        (self.ref_pos - expected_offset).abs()
    }
}

/// Get all candidates of the given type from one alignment record
///
fn get_record_candidates(
    record: &AlignmentRecord,
    sv_type: SvType,
) -> SimpleResult<Vec<RefinementCandidate>> {
    let mut candidates = Vec::new();
    let cigar = match &record.cigar {
        Some(x) if !record.is_unmapped() => x,
        _ => return Ok(candidates),
    };

    // Secondary alignments are often written without a sequence ('*'), so they can't provide
    // inserted bases
    if sv_type == SvType::Insertion && record.seq.is_none() {
        return Ok(candidates);
    }

    let mut ref_pos = record.pos - 1;
    let mut read_pos = 0;
    for c in cigar.iter() {
        match (c, sv_type) {
            (Cigar::Ins(len), SvType::Insertion) => {
                let len = *len as usize;
                let seq = match &record.seq {
                    Some(x) if read_pos + len <= x.len() => &x[read_pos..read_pos + len],
                    _ => {
                        bail!(
                            "Insertion at query position {read_pos} runs past the sequence of alignment record '{}'",
                            record.qname
                        );
                    }
                };
                candidates.push(RefinementCandidate {
                    seq: seq.to_vec(),
                    ref_pos,
                });
            }
            (Cigar::Del(len), SvType::Deletion) => {
                candidates.push(RefinementCandidate {
                    seq: vec![DELETION_FILLER_BASE; *len as usize],
                    ref_pos,
                });
            }
            _ => {}
        }
        update_ref_and_read_pos(c, &mut ref_pos, &mut read_pos);
    }
    Ok(candidates)
}

/// Select the highest scoring insertion
///
/// Each candidate is scored from its length, the popularity of similar lengths among all
/// candidates, the number of identical candidates, and the distance from the expected position.
///
fn select_best_insertion(
    candidates: Vec<RefinementCandidate>,
    expected_offset: i64,
) -> Option<RefinementCandidate> {
    let mut length_counts = HashMap::new();
    let mut support_counts = HashMap::new();
    for candidate in candidates.iter() {
        *length_counts.entry(candidate.seq.len()).or_insert(0i64) += 1;
        *support_counts
            .entry((candidate.seq.as_slice(), candidate.ref_pos))
            .or_insert(0i64) += 1;
    }

    let length_count = |x: Option<usize>| x.and_then(|x| length_counts.get(&x)).copied();
    let length_popularity = |len: usize| {
        let mut popularity = length_count(Some(len)).unwrap_or(0);
        for i in 1..=LENGTH_POPULARITY_WINDOW {
            popularity += length_count(len.checked_sub(i)).unwrap_or(0);
            popularity += length_count(len.checked_add(i)).unwrap_or(0);
        }
        popularity
    };

    let mut best: Option<(i64, usize)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let len = candidate.seq.len();
        let support = support_counts[&(candidate.seq.as_slice(), candidate.ref_pos)];
        let distance = candidate.distance(expected_offset);
        let score = INSERTION_LENGTH_WEIGHT * (len as i64 + length_popularity(len)) * support
            - distance * distance;
        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, index));
        }
    }

    let (_, best_index) = best?;
    candidates.into_iter().nth(best_index)
}

/// Select the consensus deletion
///
/// Each candidate is tallied by the number of candidates sharing its position plus the number
/// sharing its length. Among the candidates with the highest tally, the middle one in encounter
/// order is selected.
///
fn select_best_deletion(candidates: Vec<RefinementCandidate>) -> Option<RefinementCandidate> {
    let tallies = candidates
        .iter()
        .map(|x| {
            candidates
                .iter()
                .map(|y| {
                    usize::from(x.ref_pos == y.ref_pos) + usize::from(x.seq.len() == y.seq.len())
                })
                .sum::<usize>()
        })
        .collect::<Vec<_>>();

    let max_tally = *tallies.iter().max()?;
    let tied = candidates
        .into_iter()
        .zip(tallies)
        .filter(|(_, tally)| *tally == max_tally)
        .map(|(x, _)| x)
        .collect::<Vec<_>>();
    let median_index = (tied.len() - 1) / 2;
    tied.into_iter().nth(median_index)
}

/// Candidate filtering settings
pub struct CandidateExtractor {
    /// Minimum insertion or deletion length
    pub min_length: usize,

    /// Maximum distance of the candidate position from the expected offset
    pub max_distance: i64,
}

impl CandidateExtractor {
    /// Find the best candidate of the requested type from a set of alignment records
    ///
    /// # Arguments
    /// * `expected_offset` - 0-based offset into the aligned reference window where the variant is
    ///   expected
    ///
    /// Mapped records without a stored sequence are skipped when searching for insertions. Returns
    /// an error if any mapped record has an insertion extending past its query sequence.
    ///
    pub fn extract_best(
        &self,
        records: &[AlignmentRecord],
        expected_offset: i64,
        sv_type: SvType,
    ) -> SimpleResult<Option<RefinementCandidate>> {
        let mut candidates = Vec::new();
        for record in records.iter() {
            candidates.extend(
                get_record_candidates(record, sv_type)?
                    .into_iter()
                    .filter(|x| {
                        x.distance(expected_offset) <= self.max_distance
                            && x.seq.len() >= self.min_length
                    }),
            );
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        let best = match sv_type {
            SvType::Insertion => select_best_insertion(candidates, expected_offset),
            SvType::Deletion => select_best_deletion(candidates),
        };
        Ok(best)
    }

    /// Find the best candidate from SAM text output, see [Self::extract_best]
    ///
    /// Malformed SAM records, including invalid cigar strings, are returned as errors.
    ///
    pub fn extract_best_from_sam(
        &self,
        sam: &str,
        expected_offset: i64,
        sv_type: SvType,
    ) -> SimpleResult<Option<RefinementCandidate>> {
        let records = parse_sam_records(sam)?;
        self.extract_best(&records, expected_offset, sv_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_extractor() -> CandidateExtractor {
        CandidateExtractor {
            min_length: 5,
            max_distance: 100,
        }
    }

    fn sam_line(name: &str, pos: i64, cigar: &str, seq: &str) -> String {
        format!("{name}\t0\tchr1\t{pos}\t60\t{cigar}\t*\t0\t0\t{seq}\t*")
    }

    #[test]
    fn test_single_insertion() {
        let extractor = get_test_extractor();

        // A 6 base insertion after 10 aligned bases, starting at window offset 0:
        let seq = "ACGTACGTACTTTTTTACGTACGTAC";
        let sam = sam_line("c0", 1, "10M6I10M", seq);
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"TTTTTT".to_vec());
        assert_eq!(best.ref_pos, 10);

        // Same alignment starting at offset 20, with a soft-clip and hard-clip to skip:
        let seq = "GGGACGTACGTACTTTTTTACGTACGTAC";
        let sam = sam_line("c0", 21, "7H3S10M6I10M", seq);
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"TTTTTT".to_vec());
        assert_eq!(best.ref_pos, 30);
    }

    #[test]
    fn test_insertion_filters() {
        let extractor = get_test_extractor();

        // Too short:
        let sam = sam_line("c0", 1, "10M4I10M", "ACGTACGTACTTTTACGTACGTAC");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap();
        assert_eq!(best, None);

        // Too far away:
        let best = extractor
            .extract_best_from_sam(
                &sam_line("c0", 1, "10M6I10M", "ACGTACGTACTTTTTTACGTACGTAC"),
                111,
                SvType::Insertion,
            )
            .unwrap();
        assert_eq!(best, None);

        // Deletions are ignored when searching for insertions:
        let sam = sam_line("c0", 1, "10M6D10M", "ACGTACGTACACGTACGTAC");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap();
        assert_eq!(best, None);
    }

    #[test]
    fn test_closer_insertion_wins() {
        let extractor = get_test_extractor();
        let seq = "ACGTACGTACTTTTTTACGTACGTAC";
        let near = sam_line("near", 1, "10M6I10M", seq);
        let far = sam_line("far", 5, "10M6I10M", seq);

        for sam in [format!("{near}\n{far}"), format!("{far}\n{near}")] {
            let best = extractor
                .extract_best_from_sam(&sam, 10, SvType::Insertion)
                .unwrap()
                .unwrap();
            assert_eq!(best.ref_pos, 10);
        }
    }

    #[test]
    fn test_insertion_support() {
        let extractor = get_test_extractor();

        // The 6 base insertion 2 bases from the expected position is observed twice, while the 7
        // base insertion at the expected position is observed once:
        let seq6 = "ACGTACGTACTTTTTTACGTACGTAC";
        let seq7 = "ACGTACGTACGGGGGGGACGTACGTAC";
        let sam = [
            sam_line("a", 1, "10M7I10M", seq7),
            sam_line("b", 3, "10M6I10M", seq6),
            sam_line("c", 3, "10M6I10M", seq6),
        ]
        .join("\n");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"TTTTTT".to_vec());
        assert_eq!(best.ref_pos, 12);
    }

    #[test]
    fn test_deletion_consensus() {
        let extractor = get_test_extractor();
        let seq = "ACGTACGTACACGTACGTAC";
        let sam = [
            sam_line("a", 1, "10M6D10M", seq),
            sam_line("b", 1, "10M6D10M", seq),
            sam_line("c", 2, "10M8D10M", seq),
            sam_line("d", 1, "10M7D10M", seq),
        ]
        .join("\n");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Deletion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, vec![b'A'; 6]);
        assert_eq!(best.ref_pos, 10);
    }

    #[test]
    fn test_deletion_tie() {
        let extractor = get_test_extractor();
        let seq = "ACGTACGTACACGTACGTAC";

        // Three distinct deletions with equal tallies, the middle one is selected:
        let sam = [
            sam_line("a", 1, "10M6D10M", seq),
            sam_line("b", 2, "10M7D10M", seq),
            sam_line("c", 3, "10M8D10M", seq),
        ]
        .join("\n");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Deletion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq.len(), 7);
        assert_eq!(best.ref_pos, 11);
    }

    #[test]
    fn test_unmapped_and_malformed() {
        let extractor = get_test_extractor();

        let sam = "c0\t4\t*\t0\t0\t*\t*\t0\t0\tACGTACGTACTTTTTTACGTACGTAC\t*";
        let best = extractor
            .extract_best_from_sam(sam, 10, SvType::Insertion)
            .unwrap();
        assert_eq!(best, None);

        let sam = sam_line("c0", 1, "10M6Y10M", "ACGTACGTACTTTTTTACGTACGTAC");
        assert!(
            extractor
                .extract_best_from_sam(&sam, 10, SvType::Insertion)
                .is_err()
        );

        // Insertion extends past the query sequence:
        let sam = sam_line("c0", 1, "10M6I10M", "ACGTACGTACTTT");
        assert!(
            extractor
                .extract_best_from_sam(&sam, 10, SvType::Insertion)
                .is_err()
        );
    }

    #[test]
    fn test_secondary_record_without_sequence() {
        let extractor = get_test_extractor();

        let primary = sam_line("c0", 1, "10M6I10M", "ACGTACGTACTTTTTTACGTACGTAC");
        let secondary = "c0\t256\tchr1\t501\t0\t10M6I10M\t*\t0\t0\t*\t*";
        let sam = format!("{primary}\n{secondary}");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"TTTTTT".to_vec());
        assert_eq!(best.ref_pos, 10);
    }

    #[test]
    fn test_insertion_length_popularity_window() {
        let extractor = get_test_extractor();
        let sam_ins = |name: &str, base: &str, len: usize| {
            let seq = format!("ACGTACGTAC{}ACGTACGTAC", base.repeat(len));
            sam_line(name, 1, &format!("10M{len}I10M"), &seq)
        };

        // Both 20 base insertions are exactly 10 bases shorter than the 30 base insertion, so they
        // add to its popularity, but they are 11 bases shorter than the 31 base insertion:
        //   30 base score: 20 * (30 + 4) = 680
        //   31 base score: 20 * (31 + 2) = 660
        let sam = [
            sam_ins("a", "G", 31),
            sam_ins("b", "T", 30),
            sam_ins("c", "C", 20),
            sam_ins("d", "G", 20),
        ]
        .join("\n");
        let best = extractor
            .extract_best_from_sam(&sam, 10, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"T".repeat(30));
        assert_eq!(best.ref_pos, 10);
    }

    #[test]
    fn test_insertion_tie_keeps_first() {
        let extractor = get_test_extractor();

        // Equal length, support and distance on either side of the expected position:
        let seq_t = "ACGTACGTACTTTTTTACGTACGTAC";
        let seq_g = "ACGTACGTACGGGGGGACGTACGTAC";
        let left = sam_line("left", 1, "10M6I10M", seq_t);
        let right = sam_line("right", 5, "10M6I10M", seq_g);

        let best = extractor
            .extract_best_from_sam(&format!("{left}\n{right}"), 12, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"TTTTTT".to_vec());
        assert_eq!(best.ref_pos, 10);

        let best = extractor
            .extract_best_from_sam(&format!("{right}\n{left}"), 12, SvType::Insertion)
            .unwrap()
            .unwrap();
        assert_eq!(best.seq, b"GGGGGG".to_vec());
        assert_eq!(best.ref_pos, 14);
    }
}
