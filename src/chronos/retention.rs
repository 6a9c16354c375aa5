//! Count and age based pruning.

use crate::chronos::snapshot::Snapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Keep at most this many snapshots per source. 0 = unlimited.
    pub max_count: usize,
    /// Drop snapshots older than this many days. 0 = unlimited.
    pub max_age_days: u32,
}

impl RetentionPolicy {
    pub fn new(max_count: usize, max_age_days: u32) -> Self {
        Self {
            max_count,
            max_age_days,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_count == 0 && self.max_age_days == 0
    }

    /// Snapshots to delete from `snapshots` (ordered most recent first).
    ///
    /// The two rules are independent: a snapshot beyond the count limit or
    /// older than the age limit is selected. `keep` names a snapshot that is
    /// never selected, normally the one just created. Without `keep`, the
    /// age rule alone may select the whole history.
    pub fn select_for_pruning(
        &self,
        snapshots: &[Snapshot],
        keep: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<Snapshot> {
        if self.is_unlimited() {
            return Vec::new();
        }
        let cutoff = (self.max_age_days > 0).then(|| now - Duration::days(i64::from(self.max_age_days)));

        snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| keep != Some(s.stored_name.as_str()))
            .filter(|(i, s)| {
                let over_count = self.max_count > 0 && *i >= self.max_count;
                let expired = cutoff.is_some_and(|cutoff| s.created_at < cutoff);
                over_count || expired
            })
            .map(|(_, s)| s.clone())
            .collect()
    }
}
