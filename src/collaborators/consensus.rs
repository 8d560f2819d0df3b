//! Consensus assembly and polishing of variant sequences with external tools
//!

use std::fs::File;
use std::io::{BufWriter, Write};

use camino::Utf8Path;
use log::debug;
use simple_error::{SimpleResult, bail, try_with};

use super::aligner::ExternalAligner;
use super::external_tools::{
    ExternalToolSettings, ScratchFiles, read_fasta_seqs, run_command, write_fasta,
    write_single_fasta,
};
use super::{ConsensusBuilder, Polisher};
use crate::bam_utils::count_aligned_records;
use crate::variant_record::VariantKey;

const FALCONSENSE_MIN_IDT: f64 = 0.7;
const FALCONSENSE_MIN_LEN: usize = 500;
const FALCONSENSE_MIN_OVL_LEN: usize = 250;
const FALCONSENSE_MIN_COV: usize = 2;
const FALCONSENSE_N_CORE: usize = 1;

/// Write reads in falcon_sense input format
///
/// Each read is written as a seed followed by all other reads, terminated by a "+ +" line. The
/// full input is terminated by "- -".
///
/// Returns the maximum read length plus one.
///
fn write_falconsense_input(filename: &Utf8Path, reads: &[Vec<u8>]) -> SimpleResult<usize> {
    let file = try_with!(
        File::create(filename),
        "Unable to create falcon_sense input file: '{filename}'"
    );
    let mut writer = BufWriter::new(file);
    let mut write_all = || -> std::io::Result<()> {
        for seed_index in 0..reads.len() {
            let order = std::iter::once(seed_index)
                .chain((0..reads.len()).filter(|&x| x != seed_index));
            for read_index in order {
                write!(writer, "read{read_index} ")?;
                writer.write_all(&reads[read_index])?;
                writeln!(writer)?;
            }
            writeln!(writer, "+ +")?;
        }
        writeln!(writer, "- -")?;
        writer.flush()
    };
    try_with!(
        write_all(),
        "Unable to write falcon_sense input file: '{filename}'"
    );

    let max_read_len = reads.iter().map(|x| x.len()).max().unwrap_or(0);
    Ok(max_read_len + 1)
}

/// Parse fasta-like consensus output, skipping empty sequences
///
fn parse_consensus_output(text: &str) -> Vec<Vec<u8>> {
    let mut seqs = Vec::new();
    let mut seq = Vec::new();
    for line in text.lines() {
        if line.starts_with('>') {
            if !seq.is_empty() {
                seqs.push(std::mem::take(&mut seq));
            }
        } else {
            seq.extend_from_slice(line.trim_end().as_bytes());
        }
    }
    if !seq.is_empty() {
        seqs.push(seq);
    }
    seqs
}

/// Consensus assembly from supporting reads with falcon_sense
///
pub struct FalconSense {
    settings: ExternalToolSettings,
}

impl FalconSense {
    pub fn new(settings: &ExternalToolSettings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }
}

impl ConsensusBuilder for FalconSense {
    fn consensus(&self, key: &VariantKey, reads: &[Vec<u8>]) -> SimpleResult<Vec<Vec<u8>>> {
        let mut scratch =
            ScratchFiles::new(&self.settings.scratch_dir, &key.to_string(), self.settings.keep_files);
        let input_filename = scratch.path("falcon.in");
        let output_filename = scratch.path("falcon.out");

        let max_read_len = write_falconsense_input(&input_filename, reads)?;

        let args = [
            "--min_idt".to_string(),
            FALCONSENSE_MIN_IDT.to_string(),
            "--min_len".to_string(),
            FALCONSENSE_MIN_LEN.to_string(),
            "--max_read_len".to_string(),
            max_read_len.to_string(),
            "--min_ovl_len".to_string(),
            FALCONSENSE_MIN_OVL_LEN.to_string(),
            "--min_cov".to_string(),
            FALCONSENSE_MIN_COV.to_string(),
            "--n_core".to_string(),
            FALCONSENSE_N_CORE.to_string(),
        ];
        let args = args.iter().map(|x| x.as_str()).collect::<Vec<_>>();
        run_command(
            &self.settings.falconsense_path,
            &args,
            Some(&input_filename),
            Some(&output_filename),
        )?;

        let text = try_with!(
            std::fs::read_to_string(&output_filename),
            "Unable to read falcon_sense output for variant '{key}'"
        );
        Ok(parse_consensus_output(&text))
    }
}

/// Polishing of a draft variant haplotype from supporting reads with racon
///
/// Reads are aligned to the draft with minimap2 before each polishing round.
///
pub struct Racon {
    settings: ExternalToolSettings,
    aligner: ExternalAligner,

    /// Number of polishing rounds
    iterations: usize,
}

impl Racon {
    pub fn new(settings: &ExternalToolSettings, iterations: usize) -> Self {
        Self {
            settings: settings.clone(),
            aligner: ExternalAligner::minimap2(settings),
            iterations: iterations.max(1),
        }
    }
}

impl Polisher for Racon {
    fn polish(&self, key: &VariantKey, draft: &[u8], reads: &[Vec<u8>]) -> SimpleResult<Vec<u8>> {
        let mut scratch =
            ScratchFiles::new(&self.settings.scratch_dir, &key.to_string(), self.settings.keep_files);
        let reads_filename = scratch.path("racon.reads.fa");
        let mut draft_filename = scratch.path("racon.draft.fa");

        let read_seqs = reads.iter().map(|x| x.as_slice()).collect::<Vec<_>>();
        write_fasta(&reads_filename, "read", &read_seqs)?;
        write_single_fasta(&draft_filename, "draft1", draft)?;

        for round in 1..=self.iterations {
            let align_filename = scratch.path(&format!("racon.align{round}.sam"));
            let output_filename = scratch.path(&format!("racon.out{round}.fa"));

            self.aligner
                .align_files(&draft_filename, &reads_filename, &align_filename)?;
            let sam = try_with!(
                std::fs::read_to_string(&align_filename),
                "Unable to read read-to-draft alignments for variant '{key}'"
            );
            if count_aligned_records(&sam)? == 0 {
                bail!("No read alignments found for polishing variant '{key}'");
            }

            run_command(
                &self.settings.racon_path,
                &[
                    reads_filename.as_str(),
                    align_filename.as_str(),
                    draft_filename.as_str(),
                ],
                None,
                Some(&output_filename),
            )?;
            debug!("Completed racon polishing round {round} for variant '{key}'");
            draft_filename = output_filename;
        }

        let seqs = read_fasta_seqs(&draft_filename)?;
        Ok(seqs.concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_falconsense_input() {
        let dir = tempfile::tempdir().unwrap();
        let filename = Utf8Path::from_path(dir.path()).unwrap().join("falcon.in");
        let reads = vec![b"AAA".to_vec(), b"CCCC".to_vec(), b"GG".to_vec()];
        let max_len = write_falconsense_input(&filename, &reads).unwrap();
        assert_eq!(max_len, 5);

        let expected = "read0 AAA\nread1 CCCC\nread2 GG\n+ +\n\
            read1 CCCC\nread0 AAA\nread2 GG\n+ +\n\
            read2 GG\nread0 AAA\nread1 CCCC\n+ +\n\
            - -\n";
        assert_eq!(std::fs::read_to_string(&filename).unwrap(), expected);
    }

    #[test]
    fn test_parse_consensus_output() {
        let text = ">c0\nACGT\nTT\n>c1\n>c2\nGGG\n";
        assert_eq!(
            parse_consensus_output(text),
            vec![b"ACGTTT".to_vec(), b"GGG".to_vec()]
        );
        assert!(parse_consensus_output("").is_empty());
    }
}
