//! Tab-delimited summary table comparing each written variant to its refinement
//!

use std::io::Write;

use bio::alignment::distance::levenshtein;
use simple_error::{SimpleResult, try_with};

const RESULTS_TABLE_HEADER: [&str; 10] = [
    "Chromosome",
    "OriginalPosition",
    "OriginalSequence",
    "OriginalLength",
    "SVType",
    "Refined",
    "NewPosition",
    "NewSequence",
    "NewLength",
    "EditDistance",
];

#[derive(Clone, Debug, PartialEq)]
pub struct ResultsTableRow {
    pub chrom: String,
    pub original_pos: i64,
    pub original_seq: String,

    /// Length of the original variant, which may be known when its sequence is not
    pub original_length: i64,
    pub sv_type: String,

    /// Refined position and sequence, if the variant was refined
    pub refinement: Option<(i64, String)>,
}

impl ResultsTableRow {
    /// Edit distance from the original to the refined sequence, or 0 if unrefined
    pub fn edit_distance(&self) -> u32 {
        match &self.refinement {
            Some((_, seq)) => levenshtein(self.original_seq.as_bytes(), seq.as_bytes()),
            None => 0,
        }
    }

    fn to_line(&self) -> String {
        let (new_pos, new_seq, new_length) = match &self.refinement {
            Some((pos, seq)) => (*pos, seq.as_str(), seq.len() as i64),
            None => (
                self.original_pos,
                self.original_seq.as_str(),
                self.original_length,
            ),
        };
        [
            self.chrom.clone(),
            self.original_pos.to_string(),
            self.original_seq.clone(),
            self.original_length.to_string(),
            self.sv_type.clone(),
            self.refinement.is_some().to_string(),
            new_pos.to_string(),
            new_seq.to_string(),
            new_length.to_string(),
            self.edit_distance().to_string(),
        ]
        .join("\t")
    }
}

pub struct ResultsTableWriter<W: Write> {
    writer: W,
}

impl<W: Write> ResultsTableWriter<W> {
    /// Create the writer and write the table header
    pub fn new(mut writer: W) -> SimpleResult<Self> {
        try_with!(
            writeln!(writer, "{}", RESULTS_TABLE_HEADER.join("\t")),
            "Unable to write results table header"
        );
        Ok(Self { writer })
    }

    pub fn write_row(&mut self, row: &ResultsTableRow) -> SimpleResult<()> {
        try_with!(
            writeln!(self.writer, "{}", row.to_line()),
            "Unable to write results table row for variant at {}:{}",
            row.chrom,
            row.original_pos
        );
        Ok(())
    }

    pub fn flush(&mut self) -> SimpleResult<()> {
        try_with!(self.writer.flush(), "Unable to write results table");
        Ok(())
    }
}
