//! Maps live source paths to storage directories under the history root.
//!
//! The mapping works on the textual form of the path so that it behaves the
//! same on every host. Recognised absolute forms:
//!
//! ```text
//! /home/u/a.txt            -> <root>/home/u/a.txt/
//! C:\Users\u\a.txt         -> <root>/C/Users/u/a.txt/
//! \\server\share\a.txt     -> <root>/server/share/a.txt/
//! \\?\C:\Users\u\a.txt     -> <root>/C/Users/u/a.txt/
//! \\?\UNC\server\share\a   -> <root>/server/share/a/
//! ```
//!
//! Only inputs starting with a drive letter or `\\` are read as Windows
//! paths. In a `/`-rooted path every character other than `/` is part of a
//! name, so `/C:/a` and `/a\b` keep their `:` and `\`.
//!
//! The full source path (file name included) becomes the storage directory,
//! so two files only ever share a directory if they are the same file.

use crate::error::{HistoryError, HistoryResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
}

impl PathMapper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage directory for `source`. Pure: no filesystem access, so
    /// `/a/link/../b` maps like `/a/b`. Pass canonical paths when symlinks
    /// matter.
    pub fn resolve_storage_dir(&self, source: &Path) -> HistoryResult<PathBuf> {
        let raw = source.to_string_lossy();
        let components = relative_components(&raw)?;
        let mut dir = self.root.clone();
        for component in components {
            dir.push(component);
        }
        Ok(dir)
    }
}

/// Base name of the source file, as it appears in stored snapshot names.
pub fn base_name(source: &Path) -> HistoryResult<String> {
    let raw = source.to_string_lossy();
    let components = relative_components(&raw)?;
    components
        .last()
        .map(|s| s.to_string())
        .ok_or_else(|| HistoryError::invalid_path(source.display().to_string()))
}

/// Split an absolute path into normalised components with the root, drive
/// or UNC marker removed.
///
/// `.` and `..` are resolved lexically and `..` never climbs past the root
/// or drive. Symlinks are not followed, so callers that need one storage
/// directory per real file pass canonical paths.
fn relative_components(raw: &str) -> HistoryResult<Vec<&str>> {
    if raw.contains('\0') {
        return Err(HistoryError::invalid_path(raw.escape_default().to_string()));
    }

    let windows_separators: &[char] = &['/', '\\'];
    let unix_separators: &[char] = &['/'];
    let (mut rest, separators): (&str, &[char]) = if let Some(rest) = strip_verbatim(raw) {
        (rest, windows_separators)
    } else if let Some(rest) = raw.strip_prefix("\\\\") {
        (rest, windows_separators)
    } else if is_drive_absolute(raw) {
        (raw, windows_separators)
    } else if let Some(rest) = raw.strip_prefix('/') {
        // `:` and `\` are ordinary file name characters here.
        (rest, unix_separators)
    } else {
        return Err(HistoryError::invalid_path(format!("{} (not absolute)", raw)));
    };

    let mut components: Vec<&str> = Vec::new();
    if separators == windows_separators && is_drive_absolute(rest) {
        components.push(&rest[..1]);
        rest = &rest[3..];
    }
    let floor = components.len();

    for part in rest.split(separators) {
        match part {
            "" | "." => {}
            ".." => {
                if components.len() > floor {
                    components.pop();
                }
            }
            _ => components.push(part),
        }
    }

    if components.len() == floor {
        return Err(HistoryError::invalid_path(format!("{} (no file name)", raw)));
    }
    Ok(components)
}

/// `\\?\C:\x` -> `C:\x`, `\\?\UNC\srv\x` -> `srv\x`. Also accepts `\\.\`.
fn strip_verbatim(raw: &str) -> Option<&str> {
    let rest = raw
        .strip_prefix("\\\\?\\")
        .or_else(|| raw.strip_prefix("\\\\.\\"))?;
    Some(rest.strip_prefix("UNC\\").unwrap_or(rest))
}

fn is_drive_absolute(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}
