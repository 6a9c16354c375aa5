//! Bounded worker pool for background saves.
//!
//! Front ends hand every save event to the queue and return immediately.
//! Ordering between saves of the same file is left to the service's
//! per-path lock.

use crate::chronos::service::{HistoryService, SaveOutcome};
use crate::chronos::trigger::{EditorEvent, SaveTrigger};
use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Content captured by the front end at event time.
#[derive(Debug, Clone)]
pub struct SaveTask {
    pub source: PathBuf,
    pub content: Vec<u8>,
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the pending count when a task ends, panicking or not.
struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

pub struct SaveQueue {
    pool: ThreadPool,
    service: Arc<HistoryService>,
    trigger: SaveTrigger,
    pending: Arc<Pending>,
}

impl SaveQueue {
    pub fn new(service: Arc<HistoryService>, workers: usize, trigger: SaveTrigger) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("lhist-save-{}", i))
            .build()
            .context("building save worker pool")?;
        Ok(Self {
            pool,
            service,
            trigger,
            pending: Arc::new(Pending::default()),
        })
    }

    pub fn service(&self) -> &Arc<HistoryService> {
        &self.service
    }

    /// Queue a save of `path` if `event` is one of the enabled triggers.
    pub fn on_event(&self, event: EditorEvent, path: PathBuf) -> bool {
        if !self.trigger.fires_on(event) {
            debug!(path = %path.display(), ?event, "Event does not trigger a save");
            return false;
        }
        self.submit_file(path);
        true
    }

    pub fn submit(&self, task: SaveTask) {
        let service = Arc::clone(&self.service);
        self.spawn(move || log_outcome(&task.source, service.save_snapshot(&task.source, &task.content)));
    }

    /// Read `path` on a worker and save it. Oversized files are skipped
    /// without being read.
    pub fn submit_file(&self, path: PathBuf) {
        let service = Arc::clone(&self.service);
        self.spawn(move || {
            let meta = match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => {
                    debug!(path = %path.display(), "Not saved, not a regular file");
                    return;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Not saved, file unavailable");
                    return;
                }
            };
            let limit = service.options().size_limit;
            if meta.len() > limit {
                log_outcome(&path, Ok(SaveOutcome::TooLarge { size: meta.len(), limit }));
                return;
            }
            match fs::read(&path) {
                Ok(content) => log_outcome(&path, service.save_snapshot(&path, &content)),
                Err(e) => debug!(path = %path.display(), error = %e, "Not saved, file unavailable"),
            }
        });
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut count = self.pending.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .pending
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        *self.pending.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let guard = PendingGuard(Arc::clone(&self.pending));
        self.pool.spawn(move || {
            let _guard = guard;
            job();
        });
    }
}

fn log_outcome(path: &std::path::Path, outcome: crate::error::HistoryResult<SaveOutcome>) {
    match outcome {
        Ok(SaveOutcome::Created { snapshot, pruned }) => {
            debug!(path = %path.display(), name = %snapshot.stored_name, pruned, "Background save done");
        }
        Ok(SaveOutcome::Unchanged) => {}
        Ok(SaveOutcome::TooLarge { size, limit }) => {
            info!(path = %path.display(), size, limit, "Not saved, file exceeds size limit");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Background save failed"),
    }
}
