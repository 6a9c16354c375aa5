use crate::chronos::queue::SaveQueue;
use crate::chronos::trigger::EditorEvent;
use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::RegexSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use tracing::{debug, info, warn};

/// Decides which changed paths are worth a snapshot.
pub struct WatchFilter {
    history_root: PathBuf,
    ignore: RegexSet,
}

impl WatchFilter {
    pub fn new(history_root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let ignore = RegexSet::new(patterns).context("compiling watcher ignore patterns")?;
        // Event paths arrive canonicalized.
        let history_root = history_root.into();
        let history_root = history_root.canonicalize().unwrap_or(history_root);
        Ok(Self {
            history_root,
            ignore,
        })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        // Our own writes would otherwise feed back into the watcher.
        if path.starts_with(&self.history_root) {
            return true;
        }
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.ignore.is_match(&normalized)
    }
}

/// Snapshot every file under `dir` as it is written. Runs until the
/// watcher's channel closes.
pub fn watch<P: AsRef<Path>>(dir: P, queue: &SaveQueue, filter: &WatchFilter) -> Result<()> {
    let dir = dir
        .as_ref()
        .canonicalize()
        .with_context(|| format!("resolving {}", dir.as_ref().display()))?;
    let (tx, rx) = channel();

    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher.watch(&dir, RecursiveMode::Recursive)?;
    info!(dir = %dir.display(), "Watching for saves");

    for res in rx {
        match res {
            Ok(event) => {
                if !is_save(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if filter.is_ignored(&path) {
                        continue;
                    }
                    debug!(path = %path.display(), "Change detected");
                    queue.on_event(EditorEvent::Save, path);
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        }
    }

    queue.wait_idle();
    Ok(())
}

fn is_save(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}
