//! Unified diffs between snapshot contents.

use similar::{ChangeTag, TextDiff};

/// Returned instead of a header-only diff when the inputs are identical.
pub const NO_DIFFERENCES: &str = "No differences.\n";

/// Returned when the inputs differ only in bytes lost by UTF-8 decoding.
pub const UNDECODABLE_DIFFERENCES: &str =
    "Contents differ only in bytes that are not valid UTF-8.\n";

const CONTEXT_LINES: usize = 3;

/// Line counts of a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStat {
    pub insertions: usize,
    pub deletions: usize,
}

impl DiffStat {
    pub fn is_empty(&self) -> bool {
        self.insertions == 0 && self.deletions == 0
    }
}

/// Unified diff of `from` -> `to` with `---`/`+++` headers from the labels.
///
/// Invalid UTF-8 is decoded lossily.
pub fn unified_diff(from_label: &str, from: &[u8], to_label: &str, to: &[u8]) -> String {
    if from == to {
        return NO_DIFFERENCES.to_string();
    }
    let old = String::from_utf8_lossy(from);
    let new = String::from_utf8_lossy(to);
    if old == new {
        return UNDECODABLE_DIFFERENCES.to_string();
    }

    TextDiff::from_lines(old.as_ref(), new.as_ref())
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(from_label, to_label)
        .to_string()
}

pub fn diff_stat(from: &[u8], to: &[u8]) -> DiffStat {
    let old = String::from_utf8_lossy(from);
    let new = String::from_utf8_lossy(to);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

    let mut stat = DiffStat::default();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => stat.insertions += 1,
            ChangeTag::Delete => stat.deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs() {
        assert_eq!(unified_diff("a", b"", "b", b""), NO_DIFFERENCES);
        assert_eq!(unified_diff("a", b"same\n", "b", b"same\n"), NO_DIFFERENCES);
    }

    #[test]
    fn test_unified_format() {
        let diff = unified_diff(
            "old.txt",
            b"line 1\nline 2\nline 3\n",
            "new.txt",
            b"line 1\nmodified line\nline 3\n",
        );
        assert!(diff.starts_with("--- old.txt\n+++ new.txt\n"));
        assert!(diff.contains("@@ -1,3 +1,3 @@\n"));
        assert!(diff.contains("\n-line 2\n"));
        assert!(diff.contains("\n+modified line\n"));
        assert!(diff.contains("\n line 1\n"));
    }

    #[test]
    fn test_from_empty() {
        let diff = unified_diff("a", b"", "b", b"new\n");
        assert!(diff.contains("+new\n"));
        assert!(diff.contains("@@"));
    }

    #[test]
    fn test_invalid_utf8_does_not_panic() {
        let diff = unified_diff("a", b"ok\n\xff\xfe\n", "b", b"ok\nfine\n");
        assert!(diff.contains("+fine"));
        assert_eq!(unified_diff("a", b"\xff\n", "b", b"\xfe\n"), UNDECODABLE_DIFFERENCES);
    }

    #[test]
    fn test_diff_stat() {
        let stat = diff_stat(b"a\nb\nc\n", b"a\nB\nc\nd\n");
        assert_eq!(stat, DiffStat { insertions: 2, deletions: 1 });
        assert!(diff_stat(b"x\n", b"x\n").is_empty());
    }
}
