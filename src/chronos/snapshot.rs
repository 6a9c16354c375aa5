//! Snapshot records and the stored-name codec.
//!
//! A stored name looks like `20261014T093015123456-000.notes.md`:
//! UTC timestamp down to the microsecond, a three digit disambiguation
//! counter, then the source file's base name. Every field is fixed width,
//! so byte-wise ordering of names is chronological ordering.

use chrono::{DateTime, NaiveDate, SubsecRound, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Highest counter value a stored name can carry.
pub const MAX_COUNTER: u16 = 999;

lazy_static! {
    static ref STORED_NAME: Regex =
        Regex::new(r"^(\d{4})(\d{2})(\d{2})T(\d{2})(\d{2})(\d{2})(\d{6})-(\d{3})\.(.+)$").unwrap();
}

/// One immutable stored copy of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Live file this snapshot belongs to.
    pub source_path: PathBuf,
    /// File name inside the storage directory.
    pub stored_name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Full path of the stored copy.
    pub stored_path: PathBuf,
}

impl Snapshot {
    pub fn path(&self) -> &Path {
        &self.stored_path
    }

    /// Diff header label, e.g. `/p/a.txt @ 2026-10-14 09:30:15.123456 UTC`.
    pub fn label(&self) -> String {
        format!(
            "{} @ {}",
            self.source_path.display(),
            self.created_at.format("%Y-%m-%d %H:%M:%S%.6f UTC")
        )
    }
}

/// Parsed form of a stored snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredName {
    pub created_at: DateTime<Utc>,
    pub counter: u16,
    pub base_name: String,
}

impl StoredName {
    pub fn new(created_at: DateTime<Utc>, counter: u16, base_name: impl Into<String>) -> Self {
        Self {
            created_at: created_at.trunc_subsecs(6),
            counter,
            base_name: base_name.into(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let caps = STORED_NAME.captures(name)?;
        let field = |i: usize| caps[i].parse::<u32>().ok();
        let naive = NaiveDate::from_ymd_opt(field(1)? as i32, field(2)?, field(3)?)?
            .and_hms_micro_opt(field(4)?, field(5)?, field(6)?, field(7)?)?;
        Some(Self {
            created_at: Utc.from_utc_datetime(&naive),
            counter: caps[8].parse().ok()?,
            base_name: caps[9].to_string(),
        })
    }

    /// Sortable timestamp prefix shared by every counter value.
    pub fn stamp(&self) -> String {
        format!(
            "{}{:06}",
            self.created_at.format("%Y%m%dT%H%M%S"),
            self.created_at.timestamp_subsec_micros()
        )
    }

    pub fn with_counter(&self, counter: u16) -> Self {
        Self {
            counter,
            ..self.clone()
        }
    }
}

impl fmt::Display for StoredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}.{}", self.stamp(), self.counter, self.base_name)
    }
}

/// Human readable size, four significant digits (`1.5 KB`, `12 bytes`).
pub fn readable_size(size: u64) -> String {
    const SUFFIXES: [&str; 7] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB"];
    if size == 0 {
        return "0 bytes".to_string();
    }
    let order = ((63 - size.leading_zeros()) / 10) as usize;
    let scaled = size as f64 / (1u64 << (order * 10)) as f64;
    let digits = if scaled >= 1000.0 {
        0
    } else if scaled >= 100.0 {
        1
    } else if scaled >= 10.0 {
        2
    } else {
        3
    };
    let text = format!("{:.*}", digits, scaled);
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    };
    format!("{} {}", text, SUFFIXES[order])
}
