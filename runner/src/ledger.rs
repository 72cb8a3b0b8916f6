use globset::{Glob, GlobMatcher};
use ignore::{DirEntry, WalkBuilder};
use once_cell::sync::Lazy;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const LEDGER_PREFIX: &str = "jobs-";

static LEDGER_GLOB: Lazy<GlobMatcher> = Lazy::new(|| {
    Glob::new("jobs-*")
        .expect("ledger glob is valid")
        .compile_matcher()
});

/// Append-only list of the job ids submitted for one job repetition
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(raw_dir: &Path, repetition: u32) -> Self {
        Self {
            path: raw_dir.join(format!("{LEDGER_PREFIX}{repetition}")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn append(&self, job_id: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{job_id}")
    }

    /// job ids in submission order
    pub fn job_ids(&self) -> io::Result<Vec<String>> {
        Ok(fs::read_to_string(&self.path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Direct children of `dir`, sorted by file name
///
/// Hidden and git ignored entries are included, results directories are usually git ignored.
pub fn dir_entries(dir: &Path) -> Vec<DirEntry> {
    let mut builder = WalkBuilder::new(dir);
    builder
        .standard_filters(false)
        .max_depth(Some(1))
        .sort_by_file_name(|a, b| a.cmp(b));

    builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to list {}: {e}", dir.display());
                None
            }
        })
        .filter(|entry| entry.depth() == 1)
        .collect()
}

/// all job repetitions with a ledger in `raw_dir`, sorted
pub fn discover(raw_dir: &Path) -> Vec<u32> {
    let mut repetitions = dir_entries(raw_dir)
        .into_iter()
        .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_owned();
            if !LEDGER_GLOB.is_match(&name) {
                return None;
            }

            match name[LEDGER_PREFIX.len()..].parse::<u32>() {
                Ok(repetition) => Some(repetition),
                Err(_) => {
                    debug!("Ignoring {name}, not a ledger");
                    None
                }
            }
        })
        .collect::<Vec<_>>();

    // file names sort "10" before "2"
    repetitions.sort_unstable();
    repetitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_keeps_submission_order() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::new(tmp.path(), 3);

        assert!(!ledger.exists());
        ledger.append("17").unwrap();
        ledger.append("4").unwrap();
        ledger.append("99").unwrap();

        assert_eq!(ledger.path(), tmp.path().join("jobs-3"));
        assert_eq!(ledger.job_ids().unwrap(), ["17", "4", "99"]);
    }

    #[test]
    fn missing_ledger_is_an_error() {
        let tmp = TempDir::new().unwrap();

        assert!(Ledger::new(tmp.path(), 0).job_ids().is_err());
    }

    #[test]
    fn blank_lines_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("jobs-0"), "1\n\n2\n  \n").unwrap();

        assert_eq!(Ledger::new(tmp.path(), 0).job_ids().unwrap(), ["1", "2"]);
    }

    #[test]
    fn discovers_only_ledgers() {
        let tmp = TempDir::new().unwrap();
        for name in ["jobs-10", "jobs-2", "jobs-x", "123", "123.err", "batch-nodes-2-rep-0"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir(tmp.path().join("jobs-7")).unwrap();

        assert_eq!(discover(tmp.path()), [2, 10]);
    }

    #[test]
    fn dir_entries_lists_direct_children() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("b/nested")).unwrap();
        fs::create_dir(tmp.path().join(".hidden")).unwrap();
        fs::write(tmp.path().join("a"), "").unwrap();
        fs::write(tmp.path().join(".gitignore"), "*\n").unwrap();

        let names = dir_entries(tmp.path())
            .iter()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();

        assert_eq!(names, [".gitignore", ".hidden", "a", "b"]);
        assert!(dir_entries(&tmp.path().join("missing")).is_empty());
    }
}
