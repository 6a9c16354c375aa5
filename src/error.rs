//! History engine error types.

use std::io;
use thiserror::Error;

/// Result type for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Error)]
pub enum HistoryError {
    /// The source path is not absolute or cannot be mapped under the history root.
    #[error("Invalid source path: {0}")]
    InvalidPath(String),

    /// Content is larger than the configured ceiling.
    #[error("Content of {size} bytes exceeds the {limit} byte limit")]
    SizeLimitExceeded { size: u64, limit: u64 },

    /// Every disambiguated name for this timestamp is already taken.
    #[error("Could not allocate a unique snapshot name for {0}")]
    NameCollision(String),

    /// The snapshot file disappeared since it was listed.
    #[error("Snapshot no longer available: {0}")]
    NotFound(String),

    #[error("Snapshot index {index} out of range ({len} snapshots)")]
    Range { index: usize, len: usize },

    /// Underlying filesystem failure.
    #[error("Storage error while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl HistoryError {
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Map an I/O error, turning `NotFound` into [`HistoryError::NotFound`].
    pub fn from_read(what: impl Into<String>, source: io::Error) -> Self {
        let what = what.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(what)
        } else {
            Self::storage(format!("reading {}", what), source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_read_maps_not_found() {
        let err = HistoryError::from_read("x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, HistoryError::NotFound(ref s) if s == "x"));

        let err = HistoryError::from_read("x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, HistoryError::Storage { .. }));
    }

    #[test]
    fn test_messages() {
        let err = HistoryError::Range { index: 4, len: 2 };
        assert_eq!(err.to_string(), "Snapshot index 4 out of range (2 snapshots)");
    }
}
