//! Persistent log of completed variant refinements, used to resume an interrupted run
//!

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::{Mutex, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use simple_error::{SimpleResult, try_with};

/// Completion marker written as the last field of each store line
const COMPLETION_MARKER: &str = "$";

/// Sequence and position fields used for a variant which completed without a refinement
const NULL_SEQ: &str = "X";
const NULL_POS: i64 = -1;

const STORE_FIELD_COUNT: usize = 4;

/// An accepted refinement
///
/// `pos` is the 1-based footprint start of the refined variant, see
/// [crate::variant_record::SvType::footprint_offset].
///
#[derive(Clone, Debug, PartialEq)]
pub struct RefinedSequence {
    pub seq: String,
    pub pos: i64,
}

/// Refinements by variant key label
pub type RefinementMap = HashMap<String, RefinedSequence>;

/// One completed variant in the result store, `outcome` is None if no refinement was accepted
///
#[derive(Clone, Debug, PartialEq)]
pub struct StoredResult {
    pub key: String,
    pub outcome: Option<RefinedSequence>,
}

impl StoredResult {
    pub fn to_line(&self) -> String {
        let (seq, pos) = match &self.outcome {
            Some(x) => (x.seq.as_str(), x.pos),
            None => (NULL_SEQ, NULL_POS),
        };
        format!("{}\t{seq}\t{pos}\t{COMPLETION_MARKER}", self.key)
    }

    /// Parse one store line
    ///
    /// Returns None for any line which isn't a complete entry, such as a partial write from an
    /// interrupted run.
    ///
    pub fn from_line(line: &str) -> Option<Self> {
        let words = line.trim().split('\t').collect::<Vec<_>>();
        if words.len() != STORE_FIELD_COUNT || words[3] != COMPLETION_MARKER {
            return None;
        }
        let pos = words[2].parse::<i64>().ok()?;
        let outcome = if pos == NULL_POS {
            None
        } else {
            Some(RefinedSequence {
                seq: words[1].to_string(),
                pos,
            })
        };
        Some(Self {
            key: words[0].to_string(),
            outcome,
        })
    }
}

/// Append-only store of completed variant refinements
///
/// Every entry is flushed and synced to disk before its key is reported as complete, so that the
/// store can always be used to resume an interrupted run. Entries can be added concurrently from
/// multiple worker threads.
///
pub struct ResultStore {
    filename: Utf8PathBuf,
    writer: Mutex<BufWriter<File>>,
    completed_keys: RwLock<HashSet<String>>,
}

/// Read all complete entries from the store file
///
/// Also reports whether the file ends in a partial line.
///
fn read_store_entries(filename: &Utf8Path) -> SimpleResult<(Vec<StoredResult>, bool)> {
    let content = try_with!(
        std::fs::read_to_string(filename),
        "Can't read result store file: '{filename}'"
    );
    let is_torn = !(content.is_empty() || content.ends_with('\n'));
    let entries = content.lines().filter_map(StoredResult::from_line).collect();
    Ok((entries, is_torn))
}

impl ResultStore {
    /// Open the store file
    ///
    /// When `resume` is true, any existing entries are loaded and new entries are appended,
    /// otherwise the file is truncated.
    ///
    pub fn open(filename: &Utf8Path, resume: bool) -> SimpleResult<Self> {
        let mut completed_keys = HashSet::new();
        let mut is_torn = false;
        let mut options = OpenOptions::new();
        if resume && filename.exists() {
            let (entries, x) = read_store_entries(filename)?;
            is_torn = x;
            for entry in entries {
                completed_keys.insert(entry.key);
            }
            info!(
                "Loaded {} completed variants from result store '{filename}'",
                completed_keys.len()
            );
            options.append(true);
        } else {
            options.write(true).truncate(true).create(true);
        }

        let mut file = try_with!(
            options.open(filename),
            "Can't open result store file for writing: '{filename}'"
        );

        // Terminate a partial line left by an interrupted run so that new entries stay parsable
        if is_torn {
            try_with!(
                writeln!(file),
                "Can't write to result store file: '{filename}'"
            );
        }

        Ok(Self {
            filename: filename.to_owned(),
            writer: Mutex::new(BufWriter::new(file)),
            completed_keys: RwLock::new(completed_keys),
        })
    }

    fn add(&self, entry: StoredResult) -> SimpleResult<()> {
        {
            let mut writer = self.writer.lock().unwrap();
            try_with!(
                writeln!(writer, "{}", entry.to_line()),
                "Can't write to result store file: '{}'",
                self.filename
            );
            try_with!(
                writer.flush(),
                "Can't flush result store file: '{}'",
                self.filename
            );
            try_with!(
                writer.get_ref().sync_data(),
                "Can't sync result store file: '{}'",
                self.filename
            );
        }
        self.completed_keys.write().unwrap().insert(entry.key);
        Ok(())
    }

    /// Record an accepted refinement for `key`
    pub fn add_result(&self, key: &str, refined: &RefinedSequence) -> SimpleResult<()> {
        self.add(StoredResult {
            key: key.to_string(),
            outcome: Some(refined.clone()),
        })
    }

    /// Record that `key` completed without an accepted refinement
    pub fn add_null(&self, key: &str) -> SimpleResult<()> {
        self.add(StoredResult {
            key: key.to_string(),
            outcome: None,
        })
    }

    /// True if `key` has a completed entry in the store
    pub fn contains(&self, key: &str) -> bool {
        self.completed_keys.read().unwrap().contains(key)
    }

    pub fn len(&self) -> usize {
        self.completed_keys.read().unwrap().len()
    }

    /// Add every refinement in the store to `map` if the key isn't already present
    ///
    /// Returns the number of refinements added.
    ///
    pub fn fill_map_from_store(&self, map: &mut RefinementMap) -> SimpleResult<usize> {
        {
            let mut writer = self.writer.lock().unwrap();
            try_with!(
                writer.flush(),
                "Can't flush result store file: '{}'",
                self.filename
            );
        }

        let mut added_count = 0;
        let (entries, _) = read_store_entries(&self.filename)?;
        for entry in entries {
            if let Some(outcome) = entry.outcome {
                if !map.contains_key(&entry.key) {
                    map.insert(entry.key, outcome);
                    added_count += 1;
                }
            }
        }
        Ok(added_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_filename(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("resultsstore.txt")).unwrap()
    }

    #[test]
    fn test_stored_result_line() {
        let entry = StoredResult {
            key: "chr1:100:INS:a".to_string(),
            outcome: Some(RefinedSequence {
                seq: "ACGT".to_string(),
                pos: 102,
            }),
        };
        assert_eq!(entry.to_line(), "chr1:100:INS:a\tACGT\t102\t$");
        assert_eq!(StoredResult::from_line(&entry.to_line()), Some(entry));

        let entry = StoredResult {
            key: "chr1:100:INS:a".to_string(),
            outcome: None,
        };
        assert_eq!(entry.to_line(), "chr1:100:INS:a\tX\t-1\t$");
        assert_eq!(StoredResult::from_line(&entry.to_line()), Some(entry));

        // Partial writes are ignored:
        assert_eq!(StoredResult::from_line("chr1:100:INS:a\tACGT\t102"), None);
        assert_eq!(StoredResult::from_line("chr1:100:INS:a\tACGT\t10"), None);
        assert_eq!(StoredResult::from_line("chr1:100:INS:a\tACGT\t102\t"), None);
    }

    #[test]
    fn test_resume() {
        let dir = tempfile::tempdir().unwrap();
        let filename = get_test_filename(&dir);

        let refined = RefinedSequence {
            seq: "AAAA".to_string(),
            pos: 12,
        };
        {
            let store = ResultStore::open(&filename, false).unwrap();
            store.add_result("k1", &refined).unwrap();
            store.add_null("k2").unwrap();
            assert!(store.contains("k1"));
            assert!(!store.contains("k3"));
        }

        // Simulate a torn final write:
        {
            let mut f = OpenOptions::new().append(true).open(&filename).unwrap();
            write!(f, "k3\tCC").unwrap();
        }

        let store = ResultStore::open(&filename, true).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("k2"));
        assert!(!store.contains("k3"));

        // Entries appended after the torn line are still readable:
        store.add_null("k4").unwrap();
        let (entries, is_torn) = read_store_entries(&filename).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(!is_torn);

        let mut map = RefinementMap::new();
        map.insert(
            "k1".to_string(),
            RefinedSequence {
                seq: "GG".to_string(),
                pos: 1,
            },
        );
        assert_eq!(store.fill_map_from_store(&mut map).unwrap(), 0);
        assert_eq!(map["k1"].seq, "GG");

        let mut map = RefinementMap::new();
        assert_eq!(store.fill_map_from_store(&mut map).unwrap(), 1);
        assert_eq!(map["k1"], refined);
        assert!(!map.contains_key("k2"));
    }

    #[test]
    fn test_no_resume_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let filename = get_test_filename(&dir);
        {
            let store = ResultStore::open(&filename, false).unwrap();
            store.add_null("k1").unwrap();
        }
        let store = ResultStore::open(&filename, false).unwrap();
        assert_eq!(store.len(), 0);
        let mut map = RefinementMap::new();
        assert_eq!(store.fill_map_from_store(&mut map).unwrap(), 0);
    }
}
