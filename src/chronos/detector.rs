//! Decides whether new content warrants a snapshot.
//!
//! Content is compared byte for byte against the stored copy, streaming the
//! file in chunks, rather than through a content hash: files are capped by
//! the size limit, so an exact comparison stays cheap and has no collision
//! cases.

use crate::chronos::snapshot::Snapshot;
use crate::error::{HistoryError, HistoryResult};
use std::fs::File;
use std::io::{self, Read};

const CHUNK: usize = 64 * 1024;

/// `true` when there is no previous snapshot or `candidate` differs from it.
///
/// A most recent snapshot that vanished from disk counts as changed.
pub fn has_changed(candidate: &[u8], latest: Option<&Snapshot>) -> HistoryResult<bool> {
    let Some(latest) = latest else {
        return Ok(true);
    };
    if latest.size_bytes != candidate.len() as u64 {
        return Ok(true);
    }

    let mut file = match File::open(latest.path()) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(HistoryError::from_read(latest.stored_name.clone(), e)),
    };
    differs(&mut file, candidate).map_err(|e| HistoryError::from_read(latest.stored_name.clone(), e))
}

fn differs(reader: &mut impl Read, candidate: &[u8]) -> io::Result<bool> {
    let mut buf = vec![0u8; CHUNK.min(candidate.len().max(1))];
    let mut offset = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let end = offset + n;
        if end > candidate.len() || buf[..n] != candidate[offset..end] {
            return Ok(true);
        }
        offset = end;
    }
    Ok(offset != candidate.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chronos::storage::SnapshotStore;
    use chrono::Utc;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_no_previous_snapshot() {
        assert!(has_changed(b"anything", None).unwrap());
        assert!(has_changed(b"", None).unwrap());
    }

    #[test]
    fn test_identical_and_different() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 1 << 20);
        let source = Path::new("/p/a.txt");
        let latest = store.create(source, b"line 1\nline 2\n", Utc::now()).unwrap();

        assert!(!has_changed(b"line 1\nline 2\n", Some(&latest)).unwrap());
        assert!(has_changed(b"line 1\nline 3\n", Some(&latest)).unwrap());
        assert!(has_changed(b"line 1\n", Some(&latest)).unwrap());
    }

    #[test]
    fn test_large_content_compared_across_chunks() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 1 << 20);
        let source = Path::new("/p/big.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let latest = store.create(source, &content, Utc::now()).unwrap();

        assert!(!has_changed(&content, Some(&latest)).unwrap());
        let mut tweaked = content.clone();
        tweaked[150_000] ^= 1;
        assert!(has_changed(&tweaked, Some(&latest)).unwrap());
    }

    #[test]
    fn test_vanished_snapshot_counts_as_changed() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path(), 1 << 20);
        let latest = store.create(Path::new("/p/a.txt"), b"x", Utc::now()).unwrap();
        std::fs::remove_file(latest.path()).unwrap();
        assert!(has_changed(b"x", Some(&latest)).unwrap());
    }
}
