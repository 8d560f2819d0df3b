use std::collections::HashSet;
use std::sync::Mutex;

use bio::alphabets::dna::revcomp;
use log::debug;
use rust_htslib::bam::{self, Read};
use simple_error::{SimpleResult, bail, try_with};
use unwrap::unwrap;

use super::ReadExtractor;
use crate::variant_record::VariantKey;

/// Supporting reads are searched for within this distance of the variant position
const READ_SEARCH_WINDOW: i64 = 10_000;

/// For worker threads making indexed bam reads, this provides a persistent worker specific reader
/// for each bam file
struct BamReaderWorkerThreadData {
    bam_readers: Vec<bam::IndexedReader>,
}

impl BamReaderWorkerThreadData {
    fn new(bam_filenames: &[String], ref_filename: Option<&str>) -> Self {
        let mut bam_readers = Vec::new();
        for bam_filename in bam_filenames {
            let mut x = unwrap!(
                bam::IndexedReader::from_path(bam_filename),
                "Unable to open indexed alignment file: '{bam_filename}'"
            );
            if let Some(ref_filename) = ref_filename {
                unwrap!(
                    x.set_reference(ref_filename),
                    "Unable to set reference '{ref_filename}' for alignment file: '{bam_filename}'"
                );
            }
            bam_readers.push(x);
        }
        Self { bam_readers }
    }
}

/// Finds supporting read sequences by name in one or more indexed alignment files
///
/// Each refinement worker thread has its own set of alignment file readers.
///
pub struct BamReadExtractor {
    worker_thread_data: Vec<Mutex<BamReaderWorkerThreadData>>,
}

impl BamReadExtractor {
    pub fn new(bam_filenames: &[String], ref_filename: Option<&str>, thread_count: usize) -> Self {
        let worker_thread_data = (0..thread_count.max(1))
            .map(|_| Mutex::new(BamReaderWorkerThreadData::new(bam_filenames, ref_filename)))
            .collect();
        Self { worker_thread_data }
    }
}

impl ReadExtractor for BamReadExtractor {
    /// Get the sequences of the named primary alignments within 10kb of the variant
    ///
    /// Reverse strand alignments are reverse complemented to recover the original read sequence.
    ///
    fn reads(&self, key: &VariantKey, read_names: &[String]) -> SimpleResult<Vec<Vec<u8>>> {
        let worker_thread_index = rayon::current_thread_index().unwrap_or(0);
        let worker_data = &mut *self.worker_thread_data[worker_thread_index]
            .lock()
            .unwrap();

        let read_names = read_names
            .iter()
            .map(|x| x.as_bytes())
            .collect::<HashSet<_>>();

        // 0-based half-open search region:
        let begin = std::cmp::max(key.pos - 1 - READ_SEARCH_WINDOW, 0);
        let end = key.pos + READ_SEARCH_WINDOW;

        let mut reads = Vec::new();
        for bam_reader in worker_data.bam_readers.iter_mut() {
            let tid = match bam_reader.header().tid(key.chrom.as_bytes()) {
                Some(x) => x,
                None => {
                    debug!(
                        "Chromosome '{}' not found in alignment file header",
                        key.chrom
                    );
                    continue;
                }
            };
            try_with!(
                bam_reader.fetch(bam::FetchDefinition::Region(tid as i32, begin, end)),
                "Failed to fetch alignments for variant '{key}'"
            );

            let mut record = bam::Record::new();
            while let Some(r) = bam_reader.read(&mut record) {
                try_with!(r, "Failed to parse alignment record for variant '{key}'");

                if record.is_secondary()
                    || record.is_supplementary()
                    || !read_names.contains(record.qname())
                {
                    continue;
                }

                let seq = record.seq().as_bytes();
                if seq.is_empty() {
                    continue;
                }
                if record.is_reverse() {
                    reads.push(revcomp(&seq));
                } else {
                    reads.push(seq);
                }
            }
        }

        if reads.is_empty() {
            bail!("No supporting reads found for variant '{key}'");
        }
        Ok(reads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::{Cigar, CigarString};

    fn write_test_bam(dir: &tempfile::TempDir) -> String {
        let filename = dir.path().join("test.bam").to_str().unwrap().to_string();

        let mut header = bam::Header::new();
        let mut sq = bam::header::HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", "chr1");
        sq.push_tag(b"LN", 100_000);
        header.push_record(&sq);

        {
            let mut writer = bam::Writer::from_path(&filename, &header, bam::Format::Bam).unwrap();

            // (name, pos, flags, seq)
            let records: [(&[u8], i64, u16, &[u8]); 4] = [
                (b"r1", 49_000, 0, b"ACGTT"),
                (b"r2", 49_500, 0x10, b"ACCGT"),
                (b"r1", 49_600, 0x800, b"GGGGG"),
                (b"r3", 49_700, 0, b"TTTTT"),
            ];
            for (qname, pos, flags, seq) in records {
                let mut record = bam::Record::new();
                let cigar = CigarString(vec![Cigar::Match(seq.len() as u32)]);
                record.set(qname, Some(&cigar), seq, &vec![30; seq.len()]);
                record.set_tid(0);
                record.set_pos(pos);
                record.set_mapq(60);
                record.set_flags(flags);
                record.set_mtid(-1);
                record.set_mpos(-1);
                writer.write(&record).unwrap();
            }
        }
        bam::index::build(&filename, None, bam::index::Type::Bai, 1).unwrap();
        filename
    }

    #[test]
    fn test_reads() {
        let dir = tempfile::tempdir().unwrap();
        let bam_filename = write_test_bam(&dir);
        let extractor = BamReadExtractor::new(&[bam_filename], None, 1);

        let key = VariantKey {
            chrom: "chr1".to_string(),
            pos: 50_000,
            sv_type: "INS".to_string(),
            id: "a".to_string(),
        };
        let read_names = vec!["r1".to_string(), "r2".to_string()];
        let reads = extractor.reads(&key, &read_names).unwrap();
        assert_eq!(reads, vec![b"ACGTT".to_vec(), b"ACGGT".to_vec()]);

        let key = VariantKey {
            chrom: "chr2".to_string(),
            ..key
        };
        assert!(extractor.reads(&key, &read_names).is_err());
    }
}
