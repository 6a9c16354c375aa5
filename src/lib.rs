//! Automatic local version history for text files.
//!
//! Every save records a full copy of the file under a history root,
//! unless the content matches the most recent copy. Snapshots can be
//! listed, diffed, restored and pruned by count or age.
//!
//! ```no_run
//! use lhist::chronos::HistoryService;
//! use lhist::config::Config;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let service = HistoryService::new(&config.history);
//!
//! let source = Path::new("/home/u/notes.md");
//! service.save_snapshot(source, b"first draft\n")?;
//! service.save_snapshot(source, b"second draft\n")?;
//!
//! println!("{}", service.compare_with_previous(source, 0)?);
//! let original = service.restore_snapshot(source, 1)?;
//! # Ok(())
//! # }
//! ```

pub mod chronos;
pub mod config;
pub mod error;
pub mod logging;

pub use error::{HistoryError, HistoryResult};
