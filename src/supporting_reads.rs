//! Supporting read names and original allele info for all refinable variants in the input file
//!

use std::collections::HashMap;

use log::info;
use simple_error::SimpleResult;
use unwrap::unwrap;

use crate::position_index::PositionIndex;
use crate::variant_record::{SvType, VariantKey, VariantRecord};

/// Information retained from the input file for one refinable variant
#[derive(Clone, Debug)]
pub struct SupportedVariant {
    pub key: VariantKey,
    pub sv_type: SvType,

    /// Supporting read names, in the order listed in the input record
    pub read_names: Vec<String>,

    /// Original variant sequence, as described by [VariantRecord::seq]
    pub seq: String,

    /// Original signed variant length
    pub length: i64,
}

/// Variant lookup built from a single pass over the input variant file
///
/// Besides the refinable variants this also holds the index of all variant positions in the file,
/// including types which aren't refined.
///
pub struct SupportingReadIndex {
    /// Refinable variants in input file order
    variants: Vec<SupportedVariant>,

    /// Map from variant key label to index in `variants`
    key_index: HashMap<String, usize>,

    pub position_index: PositionIndex,

    /// Total number of variant records in the input file
    pub record_count: usize,
}

impl SupportingReadIndex {
    /// Build the index from the text content of a VCF file
    ///
    /// # Arguments
    /// * `rnames_field` - INFO key listing the comma-separated supporting read names
    /// * `also_deletions` - If true, deletions are refinable in addition to insertions
    ///
    pub fn from_vcf_content(
        content: &str,
        rnames_field: &str,
        also_deletions: bool,
    ) -> SimpleResult<Self> {
        let mut index = Self {
            variants: Vec::new(),
            key_index: HashMap::new(),
            position_index: PositionIndex::new(),
            record_count: 0,
        };

        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let record = VariantRecord::from_line(line)?;
            let key = record.key()?;
            index.record_count += 1;
            index.position_index.add(
                &key.sv_type,
                &key.chrom,
                key.pos,
                record.length(),
            );

            let sv_type = match record.sv_type() {
                Some(SvType::Insertion) => SvType::Insertion,
                Some(SvType::Deletion) if also_deletions => SvType::Deletion,
                _ => continue,
            };

            let read_names = record
                .info_or_empty(rnames_field)
                .split(',')
                .filter(|x| !x.is_empty())
                .map(|x| x.to_string())
                .collect::<Vec<_>>();

            let variant = SupportedVariant {
                key,
                sv_type,
                read_names,
                seq: record.seq(),
                length: record.length(),
            };

            // A repeated key replaces the earlier entry but keeps its place in the work order
            let label = variant.key.to_string();
            match index.key_index.get(&label) {
                Some(&variant_index) => index.variants[variant_index] = variant,
                None => {
                    index.key_index.insert(label, index.variants.len());
                    index.variants.push(variant);
                }
            }
        }
        Ok(index)
    }

    /// Build the index from a VCF file, which may optionally be bgzip-compressed
    ///
    pub fn from_vcf(filename: &str, rnames_field: &str, also_deletions: bool) -> Self {
        use rust_htslib::bgzf;
        use std::io::Read;

        info!("Reading supporting read names from variant file '{filename}'");

        let mut reader = unwrap!(
            bgzf::Reader::from_path(filename),
            "Unable to open variant file: '{filename}'"
        );

        let mut content = String::new();
        unwrap!(
            reader.read_to_string(&mut content),
            "Can't parse text from variant file: '{filename}'"
        );

        let index = unwrap!(
            Self::from_vcf_content(&content, rnames_field, also_deletions),
            "Invalid record in variant file: '{filename}'"
        );

        info!(
            "Found {} refinable variants out of {} records, at {} distinct positions",
            index.variants.len(),
            index.record_count,
            index.position_index.len()
        );
        index
    }

    pub fn get(&self, key: &str) -> Option<&SupportedVariant> {
        self.key_index.get(key).map(|&x| &self.variants[x])
    }

    /// Keys of all refinable variants with at least one supporting read, in input file order
    ///
    pub fn refinement_keys(&self) -> Vec<String> {
        self.variants
            .iter()
            .filter(|x| !x.read_names.is_empty())
            .map(|x| x.key.to_string())
            .collect()
    }
}
