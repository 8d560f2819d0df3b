//! Write the refined variant file
//!
//! The input variant file is streamed in order. Refined insertions and deletions are moved to
//! their refined position and sequence, and all insertion and deletion alleles are rewritten with
//! reference padding bases.
//!

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use log::{info, warn};
use rust_htslib::bgzf;
use simple_error::{SimpleResult, try_with};
use unwrap::unwrap;

use crate::collaborators::ReferenceQuery;
use crate::result_store::{RefinedSequence, RefinementMap};
use crate::results_table::{ResultsTableRow, ResultsTableWriter};
use crate::variant_record::{
    END_INFO_KEY, SEQ_INFO_KEY, SVLEN_INFO_KEY, SvType, VariantRecord,
};

#[derive(Clone, Debug)]
pub struct RewriteSettings {
    /// Number of reference bases added before each insertion or deletion allele
    pub padding_before: i64,

    /// Number of reference bases added after each insertion or deletion allele
    pub padding_after: i64,

    /// Variants longer than this are dropped from the output, or passed through unchanged if
    /// `keep_long_variants` is set
    pub max_out_length: i64,

    pub keep_long_variants: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct RewriteStats {
    pub records_written: usize,
    pub records_dropped_long: usize,

    /// Records written unchanged because they could not be rewritten
    pub records_unchanged_on_error: usize,
}

/// The variant allele to pad before writing, positioned at its footprint start
enum Allele {
    Insertion(String),
    Deletion(i64),
}

pub struct VariantRewriter<'a> {
    settings: &'a RewriteSettings,
    reference: &'a dyn ReferenceQuery,
    refinements: &'a RefinementMap,

    /// Header lines inserted immediately before the column header line
    extra_header_lines: Vec<String>,
}

impl<'a> VariantRewriter<'a> {
    pub fn new(
        settings: &'a RewriteSettings,
        reference: &'a dyn ReferenceQuery,
        refinements: &'a RefinementMap,
        extra_header_lines: Vec<String>,
    ) -> Self {
        Self {
            settings,
            reference,
            refinements,
            extra_header_lines,
        }
    }

    /// Original variant sequence as reported in the results table
    ///
    /// Deletions which only carry a placeholder sequence are looked up in the reference.
    ///
    fn get_original_table_seq(&self, record: &VariantRecord) -> SimpleResult<String> {
        let seq = record.seq();
        let is_placeholder = matches!(seq.as_str(), "" | "N" | "X");
        if is_placeholder
            && record.sv_type() == Some(SvType::Deletion)
            && record.has_info(SVLEN_INFO_KEY)
        {
            let pos = record.pos()?;
            let length = record.length().abs();
            return self
                .reference
                .substring(record.chrom(), pos + 1, pos + length);
        }
        Ok(seq)
    }

    /// Footprint start of an unrefined insertion record
    ///
    /// An insertion whose REF allele starts with the reference base at POS is anchored, and the
    /// inserted sequence follows that base. Otherwise the sequence is inserted before POS.
    ///
    fn get_unrefined_insertion_footprint(&self, record: &VariantRecord) -> SimpleResult<i64> {
        let pos = record.pos()?;
        let anchor = match record.ref_allele().as_bytes().first() {
            Some(x) if b"ACGTacgt".contains(x) => x.to_ascii_uppercase(),
            _ => return Ok(pos),
        };
        let ref_base = self.reference.substring(record.chrom(), pos, pos)?;
        if ref_base.as_bytes().first().map(|x| x.to_ascii_uppercase()) == Some(anchor) {
            Ok(pos + 1)
        } else {
            Ok(pos)
        }
    }

    /// Results table row describing `record` without refinement
    fn get_unrefined_row(record: &VariantRecord) -> SimpleResult<ResultsTableRow> {
        let original_seq = record.seq();
        let original_length = if original_seq.is_empty() {
            record.length().abs()
        } else {
            original_seq.len() as i64
        };
        Ok(ResultsTableRow {
            chrom: record.chrom().to_string(),
            original_pos: record.pos()?,
            original_seq,
            original_length,
            sv_type: record.sv_type_label(),
            refinement: None,
        })
    }

    /// Rewrite the alleles of `record` as `allele` at `footprint_start`, padded with reference
    /// bases
    ///
    fn pad_record(
        &self,
        record: &VariantRecord,
        footprint_start: i64,
        allele: &Allele,
    ) -> SimpleResult<VariantRecord> {
        let chrom = record.chrom();
        let before = self.reference.substring(
            chrom,
            footprint_start - self.settings.padding_before,
            footprint_start - 1,
        )?;
        let pos = footprint_start - before.len() as i64;

        let (ref_allele, alt_allele, end, seq, svlen) = match allele {
            Allele::Insertion(seq) => {
                let after = self.reference.substring(
                    chrom,
                    footprint_start,
                    footprint_start + self.settings.padding_after - 1,
                )?;
                (
                    before.clone() + &after,
                    before + seq + &after,
                    pos,
                    seq.clone(),
                    seq.len() as i64,
                )
            }
            Allele::Deletion(length) => {
                let deleted_end = footprint_start + length - 1;
                let deleted = self
                    .reference
                    .substring(chrom, footprint_start, deleted_end)?;
                let after = self.reference.substring(
                    chrom,
                    deleted_end + 1,
                    deleted_end + self.settings.padding_after,
                )?;
                (
                    before.clone() + &deleted + &after,
                    before + &after,
                    deleted_end,
                    deleted,
                    -length,
                )
            }
        };

        let mut record = record
            .with_pos(pos)
            .with_ref_allele(&ref_allele)
            .with_alt_allele(&alt_allele);
        if record.has_info(SVLEN_INFO_KEY) {
            record = record.with_info(SVLEN_INFO_KEY, &svlen.to_string());
        }
        if record.has_info(END_INFO_KEY) {
            record = record.with_info(END_INFO_KEY, &end.to_string());
        }
        if record.has_info(SEQ_INFO_KEY) {
            record = record.with_info(SEQ_INFO_KEY, &seq);
        }
        Ok(record)
    }

    /// Get the output record and results table row for one input record
    ///
    /// Returns None if the record should be dropped from the output.
    ///
    pub fn rewrite_record(
        &self,
        record: &VariantRecord,
    ) -> SimpleResult<Option<(VariantRecord, ResultsTableRow)>> {
        let mut row = Self::get_unrefined_row(record)?;

        if record.length().abs() > self.settings.max_out_length {
            if self.settings.keep_long_variants {
                return Ok(Some((record.clone(), row)));
            } else {
                return Ok(None);
            }
        }

        let sv_type = match record.sv_type() {
            Some(x) => x,
            None => return Ok(Some((record.clone(), row))),
        };
        row.original_seq = self.get_original_table_seq(record)?;
        if !row.original_seq.is_empty() {
            row.original_length = row.original_seq.len() as i64;
        }

        let key = record.key()?.to_string();
        let refinement = self.refinements.get(&key);

        let (footprint_start, allele) = match (sv_type, refinement) {
            (SvType::Insertion, Some(RefinedSequence { seq, pos })) => {
                (*pos, Allele::Insertion(seq.clone()))
            }
            (SvType::Deletion, Some(RefinedSequence { seq, pos })) => {
                (*pos, Allele::Deletion(seq.len() as i64))
            }
            (SvType::Insertion, None) => {
                let seq = record.seq();
                if seq.is_empty() {
                    return Ok(Some((record.clone(), row)));
                }
                (
                    self.get_unrefined_insertion_footprint(record)?,
                    Allele::Insertion(seq),
                )
            }
            (SvType::Deletion, None) => {
                let length = record.length().abs();
                if length == 0 {
                    return Ok(Some((record.clone(), row)));
                }
                (record.footprint_start()?, Allele::Deletion(length))
            }
        };

        let output_record = self.pad_record(record, footprint_start, &allele)?;

        if refinement.is_some() {
            let new_seq = match &allele {
                Allele::Insertion(seq) => seq.clone(),
                Allele::Deletion(length) => self.reference.substring(
                    record.chrom(),
                    footprint_start,
                    footprint_start + length - 1,
                )?,
            };
            let new_pos = footprint_start - sv_type.footprint_offset();
            row.refinement = Some((new_pos, new_seq));
        }
        Ok(Some((output_record, row)))
    }

    /// Stream all lines from `reader`, writing the rewritten variant file to `writer` and one
    /// results table row for each written record
    ///
    pub fn rewrite<R: BufRead, W: Write, T: Write>(
        &self,
        reader: R,
        writer: &mut W,
        table: &mut ResultsTableWriter<T>,
    ) -> SimpleResult<RewriteStats> {
        let mut stats = RewriteStats::default();
        for line in reader.lines() {
            let line = try_with!(line, "Unable to read input variant file");
            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                if line.starts_with("#CHROM") {
                    for header_line in self.extra_header_lines.iter() {
                        try_with!(
                            writeln!(writer, "{header_line}"),
                            "Unable to write output variant file"
                        );
                    }
                }
                try_with!(
                    writeln!(writer, "{line}"),
                    "Unable to write output variant file"
                );
                continue;
            }

            let record = VariantRecord::from_line(&line)?;
            let (output_record, row) = match self.rewrite_record(&record) {
                Ok(Some(x)) => x,
                Ok(None) => {
                    stats.records_dropped_long += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Writing variant '{}' on '{}' unchanged after rewrite error: {e}",
                        record.id(),
                        record.chrom()
                    );
                    stats.records_unchanged_on_error += 1;
                    let row = Self::get_unrefined_row(&record)?;
                    (record, row)
                }
            };
            try_with!(
                writeln!(writer, "{output_record}"),
                "Unable to write output variant file"
            );
            table.write_row(&row)?;
            stats.records_written += 1;
        }
        try_with!(writer.flush(), "Unable to write output variant file");
        table.flush()?;
        Ok(stats)
    }
}

/// Write the refined variant file and results table
///
/// The input variant file may optionally be bgzip-compressed.
///
pub fn rewrite_variant_file(
    rewriter: &VariantRewriter,
    input_filename: &str,
    output_filename: &Utf8Path,
    table_filename: &Utf8Path,
) -> RewriteStats {
    info!("Writing refined variants to file: '{output_filename}'");

    let reader = unwrap!(
        bgzf::Reader::from_path(input_filename),
        "Unable to open variant file: '{input_filename}'"
    );
    let output_file = unwrap!(
        File::create(output_filename),
        "Unable to create refined variant file: '{output_filename}'"
    );
    let table_file = unwrap!(
        File::create(table_filename),
        "Unable to create results table file: '{table_filename}'"
    );

    let mut writer = BufWriter::new(output_file);
    let mut table = unwrap!(
        ResultsTableWriter::new(BufWriter::new(table_file)),
        "Unable to write results table file: '{table_filename}'"
    );
    let stats = unwrap!(
        rewriter.rewrite(BufReader::new(reader), &mut writer, &mut table),
        "Failed to write refined variant file: '{output_filename}'"
    );

    info!(
        "Wrote {} variant records, dropped {} records over the maximum output length",
        stats.records_written, stats.records_dropped_long
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_ref::GenomeRef;
    use std::collections::HashMap;

    fn get_test_reference() -> GenomeRef {
        let mut chroms = HashMap::new();
        chroms.insert("chr1".to_string(), b"ACGTACGTACGTACGTACGT".to_vec());
        GenomeRef { chroms }
    }

    fn get_test_settings() -> RewriteSettings {
        RewriteSettings {
            padding_before: 1,
            padding_after: 0,
            max_out_length: 100,
            keep_long_variants: false,
        }
    }

    fn rewrite_text(
        rewriter: &VariantRewriter,
        input: &str,
    ) -> (Vec<String>, Vec<String>, RewriteStats) {
        let mut output = Vec::new();
        let mut table_output = Vec::new();
        let stats = {
            let mut table = ResultsTableWriter::new(&mut table_output).unwrap();
            rewriter
                .rewrite(input.as_bytes(), &mut output, &mut table)
                .unwrap()
        };
        let to_lines = |x: Vec<u8>| {
            String::from_utf8(x)
                .unwrap()
                .lines()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
        };
        (to_lines(output), to_lines(table_output), stats)
    }

    #[test]
    fn test_refined_insertion_padding() {
        let reference = get_test_reference();
        let settings = get_test_settings();
        let mut refinements = RefinementMap::new();
        refinements.insert(
            "chr1:12:INS:a".to_string(),
            RefinedSequence {
                seq: "AAAA".to_string(),
                pos: 12,
            },
        );
        let rewriter = VariantRewriter::new(
            &settings,
            &reference,
            &refinements,
            vec!["##source=test".to_string()],
        );

        let input = "##fileformat=VCFv4.2\n\
            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
            chr1\t12\ta\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=6;SEQ=CCCCCC\n";
        let (lines, table_lines, stats) = rewrite_text(&rewriter, input);

        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert_eq!(lines[1], "##source=test");
        assert!(lines[2].starts_with("#CHROM"));

        // Padding base is reference position 11:
        assert_eq!(
            lines[3],
            "chr1\t11\ta\tG\tGAAAA\t.\tPASS\tSVTYPE=INS;SVLEN=4;SEQ=AAAA"
        );
        assert_eq!(
            table_lines[1],
            "chr1\t12\tCCCCCC\t6\tINS\ttrue\t12\tAAAA\t4\t6"
        );
        assert_eq!(
            stats,
            RewriteStats {
                records_written: 1,
                records_dropped_long: 0,
                records_unchanged_on_error: 0,
            }
        );
    }

    #[test]
    fn test_refined_deletion() {
        let reference = get_test_reference();
        let settings = get_test_settings();
        let mut refinements = RefinementMap::new();

        // Refined deletion of reference positions 8-10, anchored at position 7
        refinements.insert(
            "chr1:5:DEL:b".to_string(),
            RefinedSequence {
                seq: "AAA".to_string(),
                pos: 8,
            },
        );
        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());

        let input = "chr1\t5\tb\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;SVLEN=-4;END=9\n";
        let (lines, table_lines, _) = rewrite_text(&rewriter, input);
        assert_eq!(
            lines[0],
            "chr1\t7\tb\tGTAC\tG\t.\tPASS\tSVTYPE=DEL;SVLEN=-3;END=10"
        );

        // Original deletion sequence is taken from the reference
        assert_eq!(
            table_lines[1],
            "chr1\t5\tCGTA\t4\tDEL\ttrue\t7\tTAC\t3\t3"
        );
    }

    #[test]
    fn test_unrefined_preserves_sequence() {
        let reference = get_test_reference();
        let settings = get_test_settings();
        let refinements = RefinementMap::new();
        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());

        let input = "chr1\t9\tc\tA\tATTT\t.\tPASS\tSVTYPE=INS\n\
            chr1\t5\td\tACGT\tA\t.\tPASS\tSVTYPE=DEL;SVLEN=-3\n\
            chr1\t3\te\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=50\n\
            chr1\t3\tf\tN\tN[chr2:100[\t.\tPASS\tSVTYPE=BND\n";
        let (lines, table_lines, stats) = rewrite_text(&rewriter, input);
        assert_eq!(stats.records_written, 4);
        assert_eq!(table_lines.len(), 5);

        let input_records = input
            .lines()
            .map(|x| VariantRecord::from_line(x).unwrap())
            .collect::<Vec<_>>();
        let output_records = lines
            .iter()
            .map(|x| VariantRecord::from_line(x).unwrap())
            .collect::<Vec<_>>();
        for (input_record, output_record) in input_records.iter().zip(output_records.iter()) {
            assert_eq!(input_record.seq(), output_record.seq());
        }

        // Anchored insertion and deletion are unchanged:
        assert_eq!(input_records[0], output_records[0]);
        assert_eq!(output_records[0].pos().unwrap(), 9);
        assert_eq!(output_records[0].ref_allele(), "A");
        assert_eq!(output_records[0].alt_allele(), "ATTT");
        assert_eq!(input_records[1], output_records[1]);

        // Symbolic insertion without sequence and other SV types pass through:
        assert_eq!(input_records[2], output_records[2]);
        assert_eq!(input_records[3], output_records[3]);

        // Symbolic insertion length is taken from SVLEN:
        assert_eq!(
            table_lines[3],
            "chr1\t3\t\t50\tINS\tfalse\t3\t\t50\t0"
        );
    }

    #[test]
    fn test_unanchored_insertion_padding() {
        let reference = get_test_reference();
        let settings = get_test_settings();
        let refinements = RefinementMap::new();
        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());

        // Placeholder REF, so the sequence is inserted before POS 12 and padded with base 11:
        let input = "chr1\t12\tg\tN\tTTTT\t.\tPASS\tSVTYPE=INS\n";
        let (lines, _, _) = rewrite_text(&rewriter, input);
        assert_eq!(lines[0], "chr1\t11\tg\tG\tGTTTT\t.\tPASS\tSVTYPE=INS");
    }

    #[test]
    fn test_unknown_chromosome_written_unchanged() {
        let reference = get_test_reference();
        let settings = get_test_settings();
        let refinements = RefinementMap::new();
        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());

        let input = "chrUn\t9\td\tA\tATTT\t.\tPASS\tSVTYPE=INS\n\
            chr1\t9\tc\tA\tATTT\t.\tPASS\tSVTYPE=INS\n";
        let (lines, table_lines, stats) = rewrite_text(&rewriter, input);
        assert_eq!(lines, input.lines().collect::<Vec<_>>());
        assert_eq!(stats.records_written, 2);
        assert_eq!(stats.records_unchanged_on_error, 1);
        assert_eq!(
            table_lines[1],
            "chrUn\t9\tTTT\t3\tINS\tfalse\t9\tTTT\t3\t0"
        );
    }

    #[test]
    fn test_long_variants() {
        let reference = get_test_reference();
        let mut settings = get_test_settings();
        let refinements = RefinementMap::new();
        let input = "chr1\t3\tlong\tN\t<INS>\t.\tPASS\tSVTYPE=INS;SVLEN=500\n\
            chr1\t9\tc\tA\tATTT\t.\tPASS\tSVTYPE=INS\n";

        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());
        let (lines, _, stats) = rewrite_text(&rewriter, input);
        assert_eq!(lines.len(), 1);
        assert_eq!(stats.records_dropped_long, 1);

        settings.keep_long_variants = true;
        let rewriter = VariantRewriter::new(&settings, &reference, &refinements, Vec::new());
        let (lines, _, stats) = rewrite_text(&rewriter, input);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], input.lines().next().unwrap());
        assert_eq!(stats.records_dropped_long, 0);
    }
}
