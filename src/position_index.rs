//! Index of all variant positions in the input file, used to detect refinements which move a
//! variant closer to one of its neighbors
//!

use std::collections::{BTreeMap, HashMap};

/// Variant positions by chromosome, mapped to the length of the variant at that position
type ChromPositions = BTreeMap<i64, i64>;

/// Sorted variant positions, grouped by SV type label and chromosome
///
/// The index is built once from the full input file before refinement starts and is only read
/// after that point, so it can be shared by reference across all worker threads.
///
#[derive(Default)]
pub struct PositionIndex {
    positions: HashMap<String, HashMap<String, ChromPositions>>,
}

impl PositionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variant position, a later variant at the same type and position replaces the length
    /// of an earlier one
    ///
    pub fn add(&mut self, sv_type: &str, chrom: &str, pos: i64, length: i64) {
        self.positions
            .entry(sv_type.to_string())
            .or_default()
            .entry(chrom.to_string())
            .or_default()
            .insert(pos, length);
    }

    pub fn get_length(&self, sv_type: &str, chrom: &str, pos: i64) -> Option<i64> {
        self.positions.get(sv_type)?.get(chrom)?.get(&pos).copied()
    }

    /// Find the position of the variant of the given type closest to `pos` on `chrom`
    ///
    /// When the closest variants before and after `pos` are equally distant, the earlier one is
    /// returned.
    ///
    pub fn nearest(&self, sv_type: &str, chrom: &str, pos: i64) -> Option<i64> {
        let chrom_positions = self.positions.get(sv_type)?.get(chrom)?;
        let floor = chrom_positions.range(..=pos).next_back().map(|(&x, _)| x);
        let ceiling = chrom_positions.range(pos..).next().map(|(&x, _)| x);
        match (floor, ceiling) {
            (Some(floor), Some(ceiling)) => {
                if (pos - floor) <= (ceiling - pos) {
                    Some(floor)
                } else {
                    Some(ceiling)
                }
            }
            (floor, None) => floor,
            (None, ceiling) => ceiling,
        }
    }

    /// Total number of indexed positions
    pub fn len(&self) -> usize {
        self.positions
            .values()
            .flat_map(|x| x.values())
            .map(|x| x.len())
            .sum()
    }
}
