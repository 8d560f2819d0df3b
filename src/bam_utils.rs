//! Alignment record utilities, covering SAM text records produced by the consensus aligner and the
//! cigar cursor methods used to walk them
//!

use rust_htslib::bam::record::{Cigar, CigarString};
use simple_error::{SimpleResult, bail, try_with};

const SAM_MIN_FIELD_COUNT: usize = 11;

/// SAM flag bit indicating that the segment is unmapped
const SAM_FLAG_UNMAPPED: u16 = 0x4;

/// Number of query bases consumed by the cigar element
///
/// Hard-clipped bases are not present in the query sequence, so these never advance the query.
///
pub fn get_cigarseg_read_offset(c: &Cigar) -> usize {
    use Cigar::*;
    match c {
        Ins(len) | SoftClip(len) | Diff(len) | Equal(len) | Match(len) => *len as usize,
        _ => 0,
    }
}

pub fn get_cigarseg_ref_offset(c: &Cigar) -> i64 {
    use Cigar::*;
    match c {
        Del(len) | RefSkip(len) | Diff(len) | Equal(len) | Match(len) => *len as i64,
        _ => 0,
    }
}

/// A utility method to track ref and read positions while iterating through a cigar string
///
/// # Example
/// ```ignore
/// let mut ref_pos = 100;
/// let mut read_pos = 0;
/// for c in cigar.iter() {
///     update_ref_and_read_pos(c, &mut ref_pos, &mut read_pos);
/// }
/// ```
pub fn update_ref_and_read_pos(c: &Cigar, ref_pos: &mut i64, read_pos: &mut usize) {
    *read_pos += get_cigarseg_read_offset(c);
    *ref_pos += get_cigarseg_ref_offset(c);
}

/// The subset of a SAM text record used for candidate extraction
///
#[derive(Debug)]
pub struct AlignmentRecord {
    pub qname: String,
    pub flag: u16,

    /// 1-based leftmost alignment position
    pub pos: i64,

    /// None for records without a cigar ('*')
    pub cigar: Option<CigarString>,

    /// None for records without a stored sequence ('*')
    pub seq: Option<Vec<u8>>,
}

impl AlignmentRecord {
    /// Parse a SAM text record
    ///
    /// The cigar string is not parsed for unmapped records.
    ///
    pub fn from_sam_line(line: &str) -> SimpleResult<Self> {
        let words = line.trim_end_matches(['\n', '\r']).split('\t').collect::<Vec<_>>();
        if words.len() < SAM_MIN_FIELD_COUNT {
            bail!(
                "SAM record has {} fields, at least {SAM_MIN_FIELD_COUNT} are required",
                words.len()
            );
        }
        let qname = words[0].to_string();
        let flag = try_with!(
            words[1].parse::<u16>(),
            "Invalid SAM flag '{}' in record '{qname}'",
            words[1]
        );
        let pos = try_with!(
            words[3].parse::<i64>(),
            "Invalid SAM position '{}' in record '{qname}'",
            words[3]
        );

        let cigar = if (flag & SAM_FLAG_UNMAPPED) != 0 || words[5] == "*" {
            None
        } else {
            Some(try_with!(
                CigarString::try_from(words[5]),
                "Invalid cigar string '{}' in SAM record '{qname}'",
                words[5]
            ))
        };

        let seq = if words[9] == "*" {
            None
        } else {
            Some(words[9].as_bytes().to_vec())
        };

        Ok(Self {
            qname,
            flag,
            pos,
            cigar,
            seq,
        })
    }

    pub fn is_unmapped(&self) -> bool {
        (self.flag & SAM_FLAG_UNMAPPED) != 0 || self.cigar.is_none()
    }
}

/// Parse SAM text output into alignment records, skipping header and empty lines
///
pub fn parse_sam_records(sam: &str) -> SimpleResult<Vec<AlignmentRecord>> {
    sam.lines()
        .filter(|x| !(x.is_empty() || x.starts_with('@')))
        .map(AlignmentRecord::from_sam_line)
        .collect()
}

/// Count the records which are aligned to the reference
pub fn count_aligned_records(sam: &str) -> SimpleResult<usize> {
    Ok(parse_sam_records(sam)?
        .iter()
        .filter(|x| !x.is_unmapped())
        .count())
}
