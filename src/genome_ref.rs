use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use bio::io::fasta;
use log::info;
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use crate::collaborators::ReferenceQuery;

#[derive(Default)]
pub struct GenomeRef {
    /// A map from chrom name to chrom sequence
    pub chroms: HashMap<String, Vec<u8>>,
}

impl ReferenceQuery for GenomeRef {
    fn substring(&self, chrom: &str, start: i64, end: i64) -> SimpleResult<String> {
        let chrom_seq = match self.chroms.get(chrom) {
            Some(x) => x,
            None => bail!("Unknown reference chromosome: '{chrom}'"),
        };
        let start = std::cmp::max(start, 1);
        if start > end {
            return Ok(String::new());
        }
        let chrom_len = chrom_seq.len() as i64;
        if start > chrom_len {
            bail!("Reference query start {start} is past the end of chromosome '{chrom}' (length {chrom_len})");
        }
        let end = std::cmp::min(end, chrom_len);
        let seq = &chrom_seq[(start - 1) as usize..end as usize];
        Ok(String::from_utf8_lossy(seq).to_string())
    }
}

/// Read fasta into GenomeRef data structure
///
/// This method converts all input characters to upper-case
///
pub fn get_genome_ref_from_fasta_reader<R: Read>(reader: R) -> SimpleResult<GenomeRef> {
    let reader = fasta::Reader::new(reader);

    let mut genome_ref = GenomeRef::default();

    for result in reader.records() {
        let record = match result {
            Ok(x) => x,
            Err(e) => bail!("Error during fasta record parsing: {e}"),
        };
        genome_ref
            .chroms
            .insert(record.id().to_string(), record.seq().to_ascii_uppercase());
    }
    Ok(genome_ref)
}

/// Read fasta file into GenomeRef data structure
///
/// This method converts all input characters to upper-case
///
pub fn get_genome_ref_from_fasta(filename: &str) -> GenomeRef {
    info!("Reading reference genome from file '{filename}'");

    let file = unwrap!(
        File::open(filename),
        "Unable to open reference fasta file: '{filename}'"
    );

    unwrap!(
        get_genome_ref_from_fasta_reader(file),
        "Unable to parse reference fasta file: '{filename}'"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn test_get_genome_ref_from_fasta_reader() {
        let mut file = tempfile::tempfile().unwrap();

        writeln!(file, ">foo desc").unwrap();
        writeln!(file, "acgtACGT").unwrap();
        writeln!(file, "TTTT").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let result = get_genome_ref_from_fasta_reader(file).unwrap();

        assert_eq!(result.chroms.len(), 1);
        assert_eq!(result.chroms["foo"], b"ACGTACGTTTTT".to_vec());
    }

    #[test]
    fn test_substring() {
        let mut chroms = HashMap::default();
        chroms.insert(String::from("foo"), b"ACGTACGTTT".to_vec());
        let genome_ref = GenomeRef { chroms };

        assert_eq!(genome_ref.substring("foo", 2, 4).unwrap(), "CGT");
        assert_eq!(genome_ref.substring("foo", -5, 2).unwrap(), "AC");
        assert_eq!(genome_ref.substring("foo", 8, 100).unwrap(), "TTT");
        assert_eq!(genome_ref.substring("foo", 5, 4).unwrap(), "");
        assert!(genome_ref.substring("foo", 11, 20).is_err());
        assert!(genome_ref.substring("bar", 1, 2).is_err());

        let window = genome_ref.window("foo", 3, 5).unwrap();
        assert_eq!(window.start, 3);
        assert_eq!(window.seq, b"GTA".to_vec());
    }
}
