//! Write-ahead log + snapshot durability layer (§4.8, §5, §7).
//!
//! On-disk layout under a configured data directory: `repo.snapshot.json`
//! (latest entity image) and `repo.wal.jsonl` (append-only JSON-lines log of
//! operations since that snapshot). WAL append writes one line, flushes, and
//! fsyncs. Snapshot writes the full image to a sibling temp file, flushes,
//! fsyncs, atomically renames over the snapshot path, then truncates the WAL
//! (also fsynced) — so a crash observes either the old snapshot plus the
//! full WAL, or the new snapshot plus an empty WAL, never a partial
//! snapshot. Mirrors `persistence::directory::Directory`'s atomic-write
//! (temp file + fsync + rename) idiom, specialized to a JSON-lines WAL
//! instead of a binary segment format.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::CoreResult;
use crate::repository::Repository;
use crate::wal::WalEntry;

const SNAPSHOT_FILE: &str = "repo.snapshot.json";
const WAL_FILE: &str = "repo.wal.jsonl";

/// Bytes used by the current snapshot and WAL files, for the storage admin
/// endpoint (§6.1 `/admin/storage`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    pub snapshot_bytes: u64,
    pub wal_bytes: u64,
}

pub struct Durability {
    data_dir: PathBuf,
    wal_path: PathBuf,
    snapshot_path: PathBuf,
    wal_file: Mutex<File>,
}

impl Durability {
    /// Opens (creating if necessary) the data directory and WAL file in
    /// append mode.
    pub fn open(data_dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let wal_path = data_dir.join(WAL_FILE);
        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let wal_file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
        Ok(Self { data_dir, wal_path, snapshot_path, wal_file: Mutex::new(wal_file) })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Appends one WAL entry: serialize to a single JSON line, write,
    /// flush, fsync. The whole operation is one critical section guarded by
    /// `wal_file`'s mutex so concurrent writers from distinct libraries
    /// never interleave partial lines.
    pub fn append(&self, entry: &WalEntry) -> CoreResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.wal_file.lock().unwrap();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Folds the repository's current state into a new snapshot, then
    /// truncates the WAL. Returns the byte size of the written snapshot.
    pub fn snapshot(&self, repo: &Repository) -> CoreResult<u64> {
        let image = repo.dump_json();
        let bytes = serde_json::to_vec_pretty(&image)?;

        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.snapshot_path)?;

        let mut file = self.wal_file.lock().unwrap();
        *file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.wal_path)?;
        file.sync_all()?;
        // Reopen in append mode so subsequent `append` calls resume correctly.
        *file = OpenOptions::new().create(true).append(true).open(&self.wal_path)?;

        Ok(bytes.len() as u64)
    }

    pub fn storage_stats(&self) -> StorageStats {
        let snapshot_bytes = fs::metadata(&self.snapshot_path).map(|m| m.len()).unwrap_or(0);
        let wal_bytes = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        StorageStats { snapshot_bytes, wal_bytes }
    }

    /// Loads the snapshot (if present), hydrates `repo`, then replays WAL
    /// entries in file order. A line that fails to parse as JSON halts
    /// replay at that line (the rest of the file is presumed to be a
    /// partial write from a crash mid-append); a line that parses as JSON
    /// but carries an unrecognized `op` decodes to [`WalEntry::Unknown`] and
    /// is simply skipped — these are deliberately two different failure
    /// modes (§4.8).
    pub fn bootstrap(&self, repo: &Repository) -> CoreResult<BootstrapReport> {
        if self.snapshot_path.exists() {
            let raw = fs::read_to_string(&self.snapshot_path)?;
            let image: serde_json::Value = serde_json::from_str(&raw)?;
            repo.hydrate(&image)?;
        }

        let mut report = BootstrapReport::default();
        if self.wal_path.exists() {
            let file = File::open(&self.wal_path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: WalEntry = match serde_json::from_str(&line) {
                    Ok(entry) => entry,
                    Err(_) => {
                        log::warn!("[wal.replay] truncating at unparseable line; {} entries applied so far", report.entries_applied);
                        break;
                    }
                };
                if matches!(entry, WalEntry::Unknown) {
                    report.entries_skipped += 1;
                    continue;
                }
                repo.apply_wal_entry(&entry)?;
                report.entries_applied += 1;
            }
        }
        log::info!(
            "[wal.replay] bootstrap complete: {} applied, {} skipped",
            report.entries_applied,
            report.entries_skipped
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapReport {
    pub entries_applied: u64,
    pub entries_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chunk, Document, Library};

    fn make_durability() -> (tempfile::TempDir, Durability) {
        let dir = tempfile::tempdir().unwrap();
        let durability = Durability::open(dir.path()).unwrap();
        (dir, durability)
    }

    #[test]
    fn append_then_bootstrap_replays_entries() {
        let (_dir, durability) = make_durability();
        let repo = Repository::new();
        let lib = Library::new("l".into(), None);
        repo.insert_library(lib.clone());
        durability.append(&WalEntry::LibraryCreate { ts: chrono::Utc::now(), data: lib.clone() }).unwrap();

        let repo2 = Repository::new();
        let report = durability.bootstrap(&repo2).unwrap();
        assert_eq!(report.entries_applied, 1);
        assert_eq!(repo2.get_library(lib.id).unwrap().name, "l");
    }

    #[test]
    fn snapshot_then_bootstrap_restores_state_and_empties_wal() {
        let (_dir, durability) = make_durability();
        let repo = Repository::new();
        let lib = Library::new("l".into(), None);
        repo.insert_library(lib.clone());
        let doc = Document::new(lib.id, "d".into());
        repo.insert_document(doc.clone());
        let mut chunk = Chunk::new(lib.id, doc.id, "hello".into());
        chunk.embedding = Some(vec![1.0, 2.0]);
        repo.insert_chunk(chunk.clone());

        durability.snapshot(&repo).unwrap();
        assert_eq!(fs::read_to_string(durability.wal_path()).unwrap(), "");

        let repo2 = Repository::new();
        durability.bootstrap(&repo2).unwrap();
        assert_eq!(repo2.get_chunk(chunk.id).unwrap().text, "hello");
    }

    #[test]
    fn unknown_op_is_skipped_not_fatal() {
        let (_dir, durability) = make_durability();
        let mut file = OpenOptions::new().append(true).open(durability.wal_path()).unwrap();
        writeln!(file, r#"{{"op":"future.thing","ts":"2024-01-01T00:00:00Z"}}"#).unwrap();
        drop(file);

        let repo = Repository::new();
        let report = durability.bootstrap(&repo).unwrap();
        assert_eq!(report.entries_applied, 0);
        assert_eq!(report.entries_skipped, 1);
    }

    #[test]
    fn truncates_at_first_unparseable_line() {
        let (_dir, durability) = make_durability();
        let lib = Library::new("l".into(), None);
        durability.append(&WalEntry::LibraryCreate { ts: chrono::Utc::now(), data: lib.clone() }).unwrap();
        let mut file = OpenOptions::new().append(true).open(durability.wal_path()).unwrap();
        writeln!(file, "{{not valid json").unwrap();
        writeln!(file, r#"{{"op":"library.delete","ts":"2024-01-01T00:00:00Z","id":"{}"}}"#, lib.id).unwrap();
        drop(file);

        let repo = Repository::new();
        let report = durability.bootstrap(&repo).unwrap();
        assert_eq!(report.entries_applied, 1);
        assert!(repo.get_library(lib.id).is_some());
    }
}
