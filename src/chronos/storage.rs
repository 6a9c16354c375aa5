use crate::chronos::path_map::{self, PathMapper};
use crate::chronos::snapshot::{Snapshot, StoredName, MAX_COUNTER};
use crate::error::{HistoryError, HistoryResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// Prefix of in-flight temp files; never parses as a stored name.
const TEMP_PREFIX: &str = ".lhist-";

/// Directory-backed snapshot storage.
///
/// There is no persisted index: the storage directory is the index, and
/// stored names sort chronologically, so a listing always reflects what is
/// on disk. Snapshot files are written to a temp file in the same directory
/// and linked into place without clobbering, so readers never see partial
/// content and an existing snapshot is never overwritten.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    mapper: PathMapper,
    size_limit: u64,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, size_limit: u64) -> Self {
        Self {
            mapper: PathMapper::new(root),
            size_limit,
        }
    }

    pub fn root(&self) -> &Path {
        self.mapper.root()
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    pub fn storage_dir(&self, source: &Path) -> HistoryResult<PathBuf> {
        self.mapper.resolve_storage_dir(source)
    }

    pub fn create(
        &self,
        source: &Path,
        content: &[u8],
        now: DateTime<Utc>,
    ) -> HistoryResult<Snapshot> {
        let size = content.len() as u64;
        if size > self.size_limit {
            return Err(HistoryError::SizeLimitExceeded {
                size,
                limit: self.size_limit,
            });
        }

        let dir = self.storage_dir(source)?;
        let base = path_map::base_name(source)?;
        fs::create_dir_all(&dir)
            .map_err(|e| HistoryError::storage(format!("creating {}", dir.display()), e))?;

        let mut tmp = write_temp(&dir, content)
            .map_err(|e| HistoryError::storage(format!("writing into {}", dir.display()), e))?;

        let name = StoredName::new(now, 0, base);
        let mut counter = next_counter(&dir, &name)?;
        loop {
            if counter > MAX_COUNTER {
                return Err(HistoryError::NameCollision(format!(
                    "{} at {}",
                    source.display(),
                    name.stamp()
                )));
            }
            let candidate = name.with_counter(counter);
            let stored_name = candidate.to_string();
            let target = dir.join(&stored_name);
            match tmp.persist_noclobber(&target) {
                Ok(_) => {
                    return Ok(Snapshot {
                        source_path: source.to_path_buf(),
                        stored_name,
                        created_at: candidate.created_at,
                        size_bytes: size,
                        stored_path: target,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(name = %stored_name, "Snapshot name taken, bumping counter");
                    tmp = e.file;
                    counter += 1;
                }
                Err(e) => {
                    return Err(HistoryError::storage(
                        format!("persisting {}", target.display()),
                        e.error,
                    ));
                }
            }
        }
    }

    /// Snapshots of `source`, most recent first.
    pub fn list(&self, source: &Path) -> HistoryResult<Vec<Snapshot>> {
        let dir = self.storage_dir(source)?;
        let base = path_map::base_name(source)?;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HistoryError::storage(format!("listing {}", dir.display()), e));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(parsed) = StoredName::parse(file_name) else {
                continue;
            };
            if parsed.base_name != base {
                continue;
            }
            // Entries can vanish between readdir and stat.
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            snapshots.push(Snapshot {
                source_path: source.to_path_buf(),
                stored_name: file_name.to_string(),
                created_at: parsed.created_at,
                size_bytes: meta.len(),
                stored_path: entry.path(),
            });
        }

        snapshots.sort_by(|a, b| b.stored_name.cmp(&a.stored_name));
        Ok(snapshots)
    }

    pub fn read(&self, snapshot: &Snapshot) -> HistoryResult<Vec<u8>> {
        fs::read(snapshot.path()).map_err(|e| HistoryError::from_read(snapshot.stored_name.clone(), e))
    }

    /// Remove one snapshot. Already missing is fine.
    pub fn delete(&self, snapshot: &Snapshot) -> HistoryResult<()> {
        match fs::remove_file(snapshot.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HistoryError::storage(
                    format!("deleting {}", snapshot.path().display()),
                    e,
                ));
            }
        }
        if let Some(dir) = snapshot.path().parent() {
            self.remove_empty_dirs(dir);
        }
        Ok(())
    }

    /// Remove every snapshot of `source`, returning how many were removed.
    ///
    /// When the storage directory holds nothing but this source's files it
    /// is moved aside in one rename before being deleted, so concurrent
    /// listings see either the full history or none of it. Nested sources
    /// keep their storage directories inside this one, so the caller must
    /// keep their writers out for the duration.
    pub fn delete_all(&self, source: &Path) -> HistoryResult<usize> {
        let snapshots = self.list(source)?;
        if snapshots.is_empty() {
            return Ok(0);
        }
        let dir = self.storage_dir(source)?;

        if self.only_holds(&dir, &snapshots) {
            if let Ok(trash) = Builder::new().prefix(TEMP_PREFIX).tempdir_in(self.root()) {
                if fs::rename(&dir, trash.path().join("history")).is_ok() {
                    drop(trash);
                    if let Some(parent) = dir.parent() {
                        self.remove_empty_dirs(parent);
                    }
                    return Ok(snapshots.len());
                }
            }
        }

        for snapshot in &snapshots {
            self.delete(snapshot)?;
        }
        Ok(snapshots.len())
    }

    /// Wipe the whole history root.
    pub fn delete_everything(&self) -> HistoryResult<()> {
        let root = self.root();
        if !root.exists() {
            return Ok(());
        }

        let parent = root.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            if let Ok(trash) = Builder::new().prefix(TEMP_PREFIX).tempdir_in(parent) {
                if fs::rename(root, trash.path().join("history")).is_ok() {
                    return trash
                        .close()
                        .map_err(|e| HistoryError::storage("removing history root", e));
                }
            }
        }

        match fs::remove_dir_all(root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::storage(
                format!("removing {}", root.display()),
                e,
            )),
        }
    }

    /// True when `dir` contains exactly the listed snapshot files.
    fn only_holds(&self, dir: &Path, snapshots: &[Snapshot]) -> bool {
        match fs::read_dir(dir) {
            Ok(entries) => {
                let count = entries.flatten().count();
                count == snapshots.len()
            }
            Err(_) => false,
        }
    }

    /// Walk upwards removing empty directories, stopping at the root.
    fn remove_empty_dirs(&self, start: &Path) {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir == self.root() || !dir.starts_with(self.root()) {
                break;
            }
            match fs::remove_dir(dir) {
                Ok(()) => current = dir.parent(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => current = dir.parent(),
                Err(_) => break,
            }
        }
    }
}

fn write_temp(dir: &Path, content: &[u8]) -> io::Result<NamedTempFile> {
    let mut tmp = Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// First counter value that sorts after every existing snapshot with the
/// same timestamp.
fn next_counter(dir: &Path, name: &StoredName) -> HistoryResult<u16> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(HistoryError::storage(format!("listing {}", dir.display()), e)),
    };
    let stamp = name.stamp();
    let highest = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(StoredName::parse))
        .filter(|parsed| parsed.base_name == name.base_name && parsed.stamp() == stamp)
        .map(|parsed| parsed.counter)
        .max();
    match highest {
        Some(MAX_COUNTER) => {
            warn!(stamp = %stamp, "Snapshot counter exhausted");
            Ok(MAX_COUNTER + 1)
        }
        Some(counter) => Ok(counter + 1),
        None => Ok(0),
    }
}
