//! Shared methods for running external sequence tools on per-variant scratch files
//!

use std::fs::File;
use std::io::BufWriter;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};

/// Paths and shared options for all external tools
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExternalToolSettings {
    pub minimap2_path: String,
    pub ngmlr_path: String,
    pub racon_path: String,
    pub falconsense_path: String,

    /// minimap2 preset, such as 'map-ont'
    pub minimap2_preset: String,

    /// Thread count given to each aligner invocation
    pub alignment_threads: usize,

    /// Directory for all per-variant scratch files
    pub scratch_dir: Utf8PathBuf,

    /// If true, scratch files are not deleted when refinement of the variant completes
    pub keep_files: bool,
}

/// Escape a variant key so that it can be used as a file name
///
/// The escape is reversible, so distinct keys never share a file name.
///
pub fn escape_key_for_filename(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Owner of the scratch files created while refining one variant
///
/// All registered files are deleted when this object is dropped, unless `keep_files` is set.
///
pub struct ScratchFiles {
    prefix: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
    keep_files: bool,
}

impl ScratchFiles {
    pub fn new(scratch_dir: &Utf8Path, key: &str, keep_files: bool) -> Self {
        Self {
            prefix: scratch_dir.join(escape_key_for_filename(key)),
            files: Vec::new(),
            keep_files,
        }
    }

    /// Register and return the scratch file path with the given suffix
    pub fn path(&mut self, suffix: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from(format!("{}.{suffix}", self.prefix));
        self.files.push(path.clone());
        path
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        if self.keep_files {
            return;
        }
        for filename in self.files.iter() {
            // Files may not exist if the refinement failed before they were written
            let _ = std::fs::remove_file(filename);
        }
    }
}

fn write_fasta_records(filename: &Utf8Path, records: &[(String, &[u8])]) -> SimpleResult<()> {
    let file = try_with!(
        File::create(filename),
        "Unable to create fasta file: '{filename}'"
    );
    let mut writer = bio::io::fasta::Writer::new(BufWriter::new(file));
    for (name, seq) in records.iter() {
        try_with!(
            writer.write(name, None, seq),
            "Unable to write fasta file: '{filename}'"
        );
    }
    try_with!(writer.flush(), "Unable to write fasta file: '{filename}'");
    Ok(())
}

/// Write sequences to a fasta file, with names formed from `name_prefix` and the sequence index
///
pub fn write_fasta(filename: &Utf8Path, name_prefix: &str, seqs: &[&[u8]]) -> SimpleResult<()> {
    let records = seqs
        .iter()
        .enumerate()
        .map(|(index, &seq)| (format!("{name_prefix}{index}"), seq))
        .collect::<Vec<_>>();
    write_fasta_records(filename, &records)
}

/// Write a single named sequence to a fasta file
pub fn write_single_fasta(filename: &Utf8Path, name: &str, seq: &[u8]) -> SimpleResult<()> {
    write_fasta_records(filename, &[(name.to_string(), seq)])
}

/// Read all sequences from a fasta file, in file order
///
pub fn read_fasta_seqs(filename: &Utf8Path) -> SimpleResult<Vec<Vec<u8>>> {
    let file = try_with!(
        File::open(filename),
        "Unable to open fasta file: '{filename}'"
    );
    let reader = bio::io::fasta::Reader::new(file);
    let mut seqs = Vec::new();
    for result in reader.records() {
        let record = try_with!(result, "Unable to parse fasta file: '{filename}'");
        seqs.push(record.seq().to_vec());
    }
    Ok(seqs)
}

/// Run an external program, optionally redirecting stdin and stdout to files
///
/// A non-zero exit status is returned as an error which includes the program's stderr.
///
pub fn run_command(
    program: &str,
    args: &[&str],
    stdin_filename: Option<&Utf8Path>,
    stdout_filename: Option<&Utf8Path>,
) -> SimpleResult<()> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(filename) = stdin_filename {
        let file = try_with!(
            File::open(filename),
            "Unable to open input file for {program}: '{filename}'"
        );
        command.stdin(Stdio::from(file));
    }
    if let Some(filename) = stdout_filename {
        let file = try_with!(
            File::create(filename),
            "Unable to create output file for {program}: '{filename}'"
        );
        command.stdout(Stdio::from(file));
    }

    debug!("Running command: {program} {}", args.join(" "));
    let output = try_with!(command.output(), "Failed to execute '{program}'");
    if !output.status.success() {
        bail!(
            "Command '{program} {}' failed with exit code {:?}: {}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_text(filename: &Utf8Path, text: &str) {
        std::fs::write(filename, text).unwrap();
    }

    #[test]
    fn test_escape_key_for_filename() {
        assert_eq!(escape_key_for_filename("chr1:100:INS:a"), "chr1:100:INS:a");
        assert_eq!(escape_key_for_filename("chr1:100:INS:a/b"), "chr1:100:INS:a%2Fb");
        assert_ne!(
            escape_key_for_filename("chr1:100:INS:a%2Fb"),
            escape_key_for_filename("chr1:100:INS:a/b")
        );
    }

    #[test]
    fn test_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_dir = Utf8Path::from_path(dir.path()).unwrap();

        let filename = {
            let mut scratch = ScratchFiles::new(scratch_dir, "chr1:100:INS:a", false);
            let filename = scratch.path("reads.fa");
            write_fasta(&filename, "read", &[b"ACGT".as_slice(), b"GGCC".as_slice()]).unwrap();
            assert_eq!(
                read_fasta_seqs(&filename).unwrap(),
                vec![b"ACGT".to_vec(), b"GGCC".to_vec()]
            );
            filename
        };
        assert!(!filename.exists());

        let filename = {
            let mut scratch = ScratchFiles::new(scratch_dir, "chr1:100:INS:a", true);
            let filename = scratch.path("reads.fa");
            write_text(&filename, ">x\nA\n");
            filename
        };
        assert!(filename.exists());
    }

    #[test]
    fn test_run_command() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let in_filename = dir.join("in.txt");
        let out_filename = dir.join("out.txt");
        write_text(&in_filename, "hello\n");

        run_command("cat", &[], Some(&in_filename), Some(&out_filename)).unwrap();
        assert_eq!(std::fs::read_to_string(&out_filename).unwrap(), "hello\n");

        assert!(run_command("false", &[], None, None).is_err());
        assert!(run_command("svrefiner-no-such-program", &[], None, None).is_err());
    }
}
