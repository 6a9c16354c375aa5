//! The history façade: save, browse, compare, restore, delete.

use crate::chronos::detector;
use crate::chronos::diff;
use crate::chronos::retention::RetentionPolicy;
use crate::chronos::snapshot::Snapshot;
use crate::chronos::storage::SnapshotStore;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, HistoryResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, info, warn};

/// Per-save limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub size_limit: u64,
    pub retention: RetentionPolicy,
}

impl From<&HistoryConfig> for SaveOptions {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            size_limit: config.file_size_limit_bytes,
            retention: config.retention(),
        }
    }
}

/// What a save did. Only [`SaveOutcome::Created`] touched the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created { snapshot: Snapshot, pruned: usize },
    /// Content matches the most recent snapshot.
    Unchanged,
    TooLarge { size: u64, limit: u64 },
}

impl SaveOutcome {
    pub fn created(&self) -> bool {
        matches!(self, SaveOutcome::Created { .. })
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            SaveOutcome::Created { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

/// One writer per storage directory; a full wipe excludes every writer.
#[derive(Default)]
struct PathLocks {
    wipe: RwLock<()>,
    dirs: Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>,
}

impl PathLocks {
    fn for_dir(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut dirs = self.dirs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = dirs.get(dir).and_then(Weak::upgrade) {
            return lock;
        }
        if dirs.len() >= 256 {
            dirs.retain(|_, lock| lock.strong_count() > 0);
        }
        let lock = Arc::new(Mutex::new(()));
        dirs.insert(dir.to_path_buf(), Arc::downgrade(&lock));
        lock
    }
}

pub struct HistoryService {
    store: SnapshotStore,
    options: SaveOptions,
    locks: PathLocks,
}

impl HistoryService {
    pub fn new(config: &HistoryConfig) -> Self {
        Self::with_store(
            SnapshotStore::new(&config.history_root, config.file_size_limit_bytes),
            SaveOptions::from(config),
        )
    }

    pub fn with_store(store: SnapshotStore, options: SaveOptions) -> Self {
        Self {
            store,
            options,
            locks: PathLocks::default(),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn options(&self) -> &SaveOptions {
        &self.options
    }

    pub fn storage_dir(&self, source: &Path) -> HistoryResult<PathBuf> {
        self.store.storage_dir(source)
    }

    /// Record `content` for `source` using the configured limits.
    pub fn save_snapshot(&self, source: &Path, content: &[u8]) -> HistoryResult<SaveOutcome> {
        self.save_snapshot_with(source, content, &self.options, Utc::now())
    }

    /// Size check, change detection, create, then prune. Serialized per
    /// source; saves of different sources run in parallel.
    pub fn save_snapshot_with(
        &self,
        source: &Path,
        content: &[u8],
        options: &SaveOptions,
        now: DateTime<Utc>,
    ) -> HistoryResult<SaveOutcome> {
        let dir = self.store.storage_dir(source)?;

        let size = content.len() as u64;
        if size > options.size_limit {
            info!(path = %source.display(), size, limit = options.size_limit, "Not saved, file exceeds size limit");
            return Ok(SaveOutcome::TooLarge {
                size,
                limit: options.size_limit,
            });
        }

        let _wipe = self.locks.wipe.read().unwrap_or_else(PoisonError::into_inner);
        let lock = self.locks.for_dir(&dir);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.store.list(source)?;
        if !detector::has_changed(content, existing.first())? {
            debug!(path = %source.display(), "Not saved, no changes");
            return Ok(SaveOutcome::Unchanged);
        }

        // A clock that stepped backwards must not sort the new snapshot
        // below the current head.
        let stamp = existing
            .first()
            .map_or(now, |latest| now.max(latest.created_at));
        let snapshot = match self.store.create(source, content, stamp) {
            Ok(snapshot) => snapshot,
            // The store's own limit can be tighter than the per-call one.
            Err(HistoryError::SizeLimitExceeded { size, limit }) => {
                info!(path = %source.display(), size, limit, "Not saved, file exceeds size limit");
                return Ok(SaveOutcome::TooLarge { size, limit });
            }
            Err(e) => return Err(e),
        };
        info!(path = %source.display(), name = %snapshot.stored_name, size, "Snapshot saved");

        let mut all = Vec::with_capacity(existing.len() + 1);
        all.push(snapshot.clone());
        all.extend(existing);
        let pruned = self.prune(&all, &snapshot, &options.retention, now);

        Ok(SaveOutcome::Created { snapshot, pruned })
    }

    fn prune(
        &self,
        snapshots: &[Snapshot],
        created: &Snapshot,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> usize {
        let doomed = policy.select_for_pruning(snapshots, Some(&created.stored_name), now);
        let mut pruned = 0;
        for snapshot in &doomed {
            match self.store.delete(snapshot) {
                Ok(()) => pruned += 1,
                Err(e) => warn!(name = %snapshot.stored_name, error = %e, "Failed to prune snapshot"),
            }
        }
        if pruned > 0 {
            info!(path = %created.source_path.display(), pruned, "Pruned old snapshots");
        }
        pruned
    }

    /// Most recent first.
    pub fn list_snapshots(&self, source: &Path) -> HistoryResult<Vec<Snapshot>> {
        self.store.list(source)
    }

    pub fn snapshot_at(&self, source: &Path, index: usize) -> HistoryResult<Snapshot> {
        let mut snapshots = self.store.list(source)?;
        let len = snapshots.len();
        if index >= len {
            return Err(HistoryError::Range { index, len });
        }
        Ok(snapshots.swap_remove(index))
    }

    pub fn read_snapshot(&self, source: &Path, index: usize) -> HistoryResult<Vec<u8>> {
        let snapshot = self.snapshot_at(source, index)?;
        self.store.read(&snapshot)
    }

    /// Diff from snapshot `index` to the live content.
    pub fn compare_to_live(
        &self,
        source: &Path,
        index: usize,
        live: &[u8],
    ) -> HistoryResult<String> {
        let snapshot = self.snapshot_at(source, index)?;
        let content = self.store.read(&snapshot)?;
        Ok(diff::unified_diff(
            &snapshot.label(),
            &content,
            &source.display().to_string(),
            live,
        ))
    }

    /// Diff from the older snapshot to the newer one.
    pub fn compare_incremental(
        &self,
        source: &Path,
        newer: usize,
        older: usize,
    ) -> HistoryResult<String> {
        let snapshots = self.store.list(source)?;
        let len = snapshots.len();
        let pick = |index: usize| {
            snapshots
                .get(index)
                .ok_or(HistoryError::Range { index, len })
        };
        let newer = pick(newer)?;
        let older = pick(older)?;
        let newer_content = self.store.read(newer)?;
        let older_content = self.store.read(older)?;
        Ok(diff::unified_diff(
            &older.label(),
            &older_content,
            &newer.label(),
            &newer_content,
        ))
    }

    /// Diff of snapshot `index` against the one saved just before it.
    pub fn compare_with_previous(&self, source: &Path, index: usize) -> HistoryResult<String> {
        self.compare_incremental(source, index, index + 1)
    }

    /// Content of snapshot `index` for the caller to write back. History
    /// itself is left untouched.
    pub fn restore_snapshot(&self, source: &Path, index: usize) -> HistoryResult<Vec<u8>> {
        let content = self.read_snapshot(source, index)?;
        info!(path = %source.display(), index, "Snapshot restored");
        Ok(content)
    }

    /// Forget one source's history.
    ///
    /// Excludes every writer, not just this source's: storage directories
    /// of nested sources (`/p/x/y` under `/p/x`) live inside this one.
    pub fn delete_history(&self, source: &Path) -> HistoryResult<usize> {
        self.store.storage_dir(source)?;
        let _wipe = self.locks.wipe.write().unwrap_or_else(PoisonError::into_inner);

        let removed = self.store.delete_all(source)?;
        info!(path = %source.display(), removed, "History deleted");
        Ok(removed)
    }

    /// Wipe the history of every file.
    pub fn delete_all_history(&self) -> HistoryResult<()> {
        let _wipe = self.locks.wipe.write().unwrap_or_else(PoisonError::into_inner);
        self.store.delete_everything()?;
        info!(root = %self.store.root().display(), "History deleted for all files");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn setup(max_count: usize, max_age_days: u32) -> (TempDir, HistoryService) {
        let dir = TempDir::new().unwrap();
        let config = HistoryConfig {
            history_root: dir.path().join("history"),
            max_snapshot_count: max_count,
            max_age_days,
            ..HistoryConfig::default()
        };
        (dir, HistoryService::new(&config))
    }

    #[test]
    fn test_identical_saves_store_once() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");

        let first = service.save_snapshot(source, b"same").unwrap();
        let second = service.save_snapshot(source, b"same").unwrap();
        assert!(first.created());
        assert_eq!(second, SaveOutcome::Unchanged);
        assert_eq!(service.list_snapshots(source).unwrap().len(), 1);
    }

    #[test]
    fn test_distinct_saves_most_recent_first() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");

        service.save_snapshot(source, b"one").unwrap();
        service.save_snapshot(source, b"two").unwrap();
        assert_eq!(service.list_snapshots(source).unwrap().len(), 2);
        assert_eq!(service.read_snapshot(source, 0).unwrap(), b"two");
        assert_eq!(service.read_snapshot(source, 1).unwrap(), b"one");
    }

    #[test]
    fn test_size_limit_is_a_no_op() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/big.txt");
        let options = SaveOptions {
            size_limit: 4,
            ..*service.options()
        };

        let outcome = service
            .save_snapshot_with(source, b"12345", &options, Utc::now())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::TooLarge { size: 5, limit: 4 });
        assert!(outcome.snapshot().is_none());
        assert!(service.list_snapshots(source).unwrap().is_empty());
    }

    #[test]
    fn test_store_limit_below_call_limit_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = HistoryConfig {
            history_root: dir.path().join("history"),
            file_size_limit_bytes: 8,
            ..HistoryConfig::default()
        };
        let service = HistoryService::new(&config);
        let source = Path::new("/home/u/big.txt");
        let options = SaveOptions {
            size_limit: 1024,
            ..*service.options()
        };

        let outcome = service
            .save_snapshot_with(source, &[b'x'; 16], &options, Utc::now())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::TooLarge { size: 16, limit: 8 });
        assert!(service.list_snapshots(source).unwrap().is_empty());
    }

    #[test]
    fn test_failed_create_leaves_nothing_behind() {
        let (_dir, service) = setup(50, 0);
        // The stored name outgrows the file system's name length limit while
        // the storage directory itself stays creatable.
        let source = PathBuf::from(format!("/home/u/{}", "n".repeat(240)));

        let err = service.save_snapshot(&source, b"content").unwrap_err();
        assert!(matches!(err, HistoryError::Storage { .. }), "{:?}", err);
        assert!(service.list_snapshots(&source).unwrap().is_empty());

        let storage_dir = service.storage_dir(&source).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(&storage_dir)
            .map(|entries| entries.flatten().map(|e| e.file_name()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn test_count_pruning_keeps_most_recent() {
        let (_dir, service) = setup(3, 0);
        let source = Path::new("/home/u/a.txt");
        for i in 0..5 {
            service.save_snapshot(source, format!("v{}", i).as_bytes()).unwrap();
        }

        let contents: Vec<Vec<u8>> = (0..3)
            .map(|i| service.read_snapshot(source, i).unwrap())
            .collect();
        assert_eq!(service.list_snapshots(source).unwrap().len(), 3);
        assert_eq!(contents, vec![b"v4".to_vec(), b"v3".to_vec(), b"v2".to_vec()]);
    }

    #[test]
    fn test_age_pruning_on_next_save() {
        let (_dir, service) = setup(0, 30);
        let source = Path::new("/home/u/a.txt");
        let now = Utc::now();
        service.store().create(source, b"old", now - Duration::days(31)).unwrap();
        service.store().create(source, b"recent", now - Duration::days(29)).unwrap();

        let outcome = service.save_snapshot(source, b"new").unwrap();
        assert!(matches!(outcome, SaveOutcome::Created { pruned: 1, .. }));

        let remaining: Vec<Vec<u8>> = service
            .list_snapshots(source)
            .unwrap()
            .iter()
            .map(|s| service.store().read(s).unwrap())
            .collect();
        assert_eq!(remaining, vec![b"new".to_vec(), b"recent".to_vec()]);
    }

    #[test]
    fn test_unchanged_save_does_not_prune() {
        let (_dir, service) = setup(0, 30);
        let source = Path::new("/home/u/a.txt");
        service
            .store()
            .create(source, b"old", Utc::now() - Duration::days(60))
            .unwrap();

        assert_eq!(service.save_snapshot(source, b"old").unwrap(), SaveOutcome::Unchanged);
        assert_eq!(service.list_snapshots(source).unwrap().len(), 1);
    }

    #[test]
    fn test_backwards_clock_still_lists_new_snapshot_first() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");
        let now = Utc::now();
        service
            .save_snapshot_with(source, b"later", service.options(), now)
            .unwrap();
        service
            .save_snapshot_with(source, b"earlier clock", service.options(), now - Duration::hours(1))
            .unwrap();

        assert_eq!(service.read_snapshot(source, 0).unwrap(), b"earlier clock");
    }

    #[test]
    fn test_restore_leaves_history_unchanged() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");
        service.save_snapshot(source, b"one").unwrap();
        service.save_snapshot(source, b"two").unwrap();

        let before = service.list_snapshots(source).unwrap();
        assert_eq!(service.restore_snapshot(source, 1).unwrap(), b"one");
        assert_eq!(service.list_snapshots(source).unwrap(), before);
    }

    #[test]
    fn test_range_errors() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");
        service.save_snapshot(source, b"one").unwrap();

        assert!(matches!(
            service.read_snapshot(source, 1),
            Err(HistoryError::Range { index: 1, len: 1 })
        ));
        assert!(matches!(
            service.compare_with_previous(source, 0),
            Err(HistoryError::Range { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_relative_path_rejected() {
        let (_dir, service) = setup(50, 0);
        assert!(matches!(
            service.save_snapshot(Path::new("relative.txt"), b"x"),
            Err(HistoryError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_compare_to_live_and_incremental() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");
        service.save_snapshot(source, b"a\nb\n").unwrap();
        service.save_snapshot(source, b"a\nc\n").unwrap();

        let live = service.compare_to_live(source, 1, b"a\nc\nd\n").unwrap();
        assert!(live.contains("-b\n"));
        assert!(live.contains("+d\n"));
        assert!(live.contains("+++ /home/u/a.txt\n"));

        let incremental = service.compare_with_previous(source, 0).unwrap();
        assert!(incremental.contains("-b\n"));
        assert!(incremental.contains("+c\n"));

        assert_eq!(service.compare_to_live(source, 0, b"a\nc\n").unwrap(), diff::NO_DIFFERENCES);
    }

    #[test]
    fn test_compare_reports_vanished_snapshot() {
        let (_dir, service) = setup(50, 0);
        let source = Path::new("/home/u/a.txt");
        let outcome = service.save_snapshot(source, b"x").unwrap();
        let snapshot = outcome.snapshot().unwrap().clone();

        // Listed, then removed by someone else before it is read.
        let listed = service.list_snapshots(source).unwrap();
        std::fs::remove_file(snapshot.path()).unwrap();
        assert!(matches!(service.store().read(&listed[0]), Err(HistoryError::NotFound(_))));
    }

    #[test]
    fn test_delete_all_history() {
        let (_dir, service) = setup(50, 0);
        let sources = [Path::new("/a/x.txt"), Path::new("/b/x.txt"), Path::new("/c/y.md")];
        for source in sources {
            service.save_snapshot(source, b"content").unwrap();
        }

        service.delete_all_history().unwrap();
        for source in sources {
            assert!(service.list_snapshots(source).unwrap().is_empty());
        }
        // Saving works again afterwards.
        assert!(service.save_snapshot(sources[0], b"again").unwrap().created());
    }

    #[test]
    fn test_delete_history_for_one_source() {
        let (_dir, service) = setup(50, 0);
        service.save_snapshot(Path::new("/a/x.txt"), b"1").unwrap();
        service.save_snapshot(Path::new("/a/x.txt"), b"2").unwrap();
        service.save_snapshot(Path::new("/a/y.txt"), b"1").unwrap();

        assert_eq!(service.delete_history(Path::new("/a/x.txt")).unwrap(), 2);
        assert!(service.list_snapshots(Path::new("/a/x.txt")).unwrap().is_empty());
        assert_eq!(service.list_snapshots(Path::new("/a/y.txt")).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_saves_distinct_paths() {
        let (_dir, service) = setup(50, 0);
        let sources: Vec<PathBuf> = (0..100)
            .map(|i| PathBuf::from(format!("/work/dir{}/file.txt", i)))
            .collect();

        std::thread::scope(|scope| {
            for source in &sources {
                let service = &service;
                scope.spawn(move || {
                    let outcome = service.save_snapshot(source, source.to_string_lossy().as_bytes());
                    assert!(outcome.unwrap().created());
                });
            }
        });

        for source in &sources {
            let listed = service.list_snapshots(source).unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(service.store().read(&listed[0]).unwrap(), source.to_string_lossy().as_bytes());
        }
    }

    #[test]
    fn test_concurrent_saves_same_path() {
        let (_dir, service) = setup(0, 0);
        let source = Path::new("/work/shared.txt");
        let now = Utc::now();

        std::thread::scope(|scope| {
            for i in 0..16 {
                let service = &service;
                scope.spawn(move || {
                    // Same timestamp for every writer forces name disambiguation.
                    service
                        .save_snapshot_with(source, format!("writer {}", i).as_bytes(), service.options(), now)
                        .unwrap();
                });
            }
        });

        let listed = service.list_snapshots(source).unwrap();
        let names: HashSet<&str> = listed.iter().map(|s| s.stored_name.as_str()).collect();
        assert_eq!(names.len(), listed.len());
        assert_eq!(listed.len(), 16);
    }

    #[test]
    fn test_wipe_races_with_saves() {
        let (_dir, service) = setup(0, 0);
        let sources: Vec<PathBuf> = (0..4)
            .map(|i| PathBuf::from(format!("/work/w{}/file.txt", i)))
            .collect();
        let barrier = std::sync::Barrier::new(sources.len() + 1);

        let created: Vec<Vec<String>> = std::thread::scope(|scope| {
            let savers: Vec<_> = sources
                .iter()
                .map(|source| {
                    let (service, barrier) = (&service, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        (0..40)
                            .map(|i| {
                                let outcome = service
                                    .save_snapshot(source, format!("rev {}", i).as_bytes())
                                    .unwrap();
                                outcome.snapshot().unwrap().stored_name.clone()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            barrier.wait();
            std::thread::sleep(std::time::Duration::from_millis(2));
            service.delete_all_history().unwrap();

            savers.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // What survives is exactly the saves that ran after the wipe.
        for (source, created) in sources.iter().zip(&created) {
            let mut remaining: Vec<String> = service
                .list_snapshots(source)
                .unwrap()
                .into_iter()
                .map(|s| s.stored_name)
                .collect();
            remaining.reverse();
            assert!(created.ends_with(&remaining), "{:?}", source);
        }
    }

    #[test]
    fn test_delete_history_races_with_nested_saves() {
        let (_dir, service) = setup(0, 0);
        let outer = Path::new("/p/x");
        let inner = Path::new("/p/x/y");

        let saved = std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                (0..40)
                    .filter(|i| {
                        service
                            .save_snapshot(inner, format!("inner {}", i).as_bytes())
                            .unwrap()
                            .created()
                    })
                    .count()
            });
            for i in 0..40 {
                service.save_snapshot(outer, format!("outer {}", i).as_bytes()).unwrap();
                service.delete_history(outer).unwrap();
            }
            writer.join().unwrap()
        });

        assert!(service.list_snapshots(outer).unwrap().is_empty());
        assert_eq!(service.list_snapshots(inner).unwrap().len(), saved);
    }
}
