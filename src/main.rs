use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use lhist::chronos::queue::SaveQueue;
use lhist::chronos::snapshot::readable_size;
use lhist::chronos::watcher::{self, WatchFilter};
use lhist::chronos::{diff, HistoryService, SaveOutcome};
use lhist::config::Config;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// History root directory (overrides config)
    #[arg(long, global = true)]
    history_root: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a snapshot of FILE now
    Save { file: PathBuf },
    /// List snapshots of FILE, most recent first
    List {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the content of a snapshot
    Show { file: PathBuf, index: usize },
    /// Diff a snapshot against the live file
    Diff {
        file: PathBuf,
        #[arg(default_value_t = 0)]
        index: usize,
    },
    /// Diff a snapshot against the one before it
    DiffPrev {
        file: PathBuf,
        #[arg(default_value_t = 0)]
        index: usize,
    },
    /// Write a snapshot back to the live file
    Restore { file: PathBuf, index: usize },
    /// Delete the history of FILE
    Forget { file: PathBuf },
    /// Delete the history of every file
    Purge {
        #[arg(long)]
        yes: bool,
    },
    /// Print the directory holding FILE's snapshots
    Where { file: PathBuf },
    /// Snapshot files under DIR whenever they are written
    Watch {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    lhist::logging::init(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("lhist: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });
    if let Some(root) = args.history_root {
        config.history.history_root = root;
    }
    let service = HistoryService::new(&config.history);

    match args.command {
        Command::Save { file } => {
            let file = absolute(&file)?;
            let content = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            match service.save_snapshot(&file, &content)? {
                SaveOutcome::Created { snapshot, pruned } => {
                    println!("Saved {}", snapshot.stored_name);
                    if pruned > 0 {
                        println!("Pruned {} old snapshot(s)", pruned);
                    }
                }
                SaveOutcome::Unchanged => println!("Not saved, no changes for {}", file.display()),
                SaveOutcome::TooLarge { limit, .. } => {
                    println!("Not saved, exceeded {} limit", readable_size(limit))
                }
            }
        }
        Command::List { file, json } => {
            let file = absolute(&file)?;
            let snapshots = service.list_snapshots(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else if snapshots.is_empty() {
                println!("Local history not found for {}", file.display());
            } else {
                for (i, snapshot) in snapshots.iter().enumerate() {
                    let change = match (service.store().read(snapshot), snapshots.get(i + 1)) {
                        (Ok(newer), Some(older)) => match service.store().read(older) {
                            Ok(older) => {
                                let stat = diff::diff_stat(&older, &newer);
                                format!("+{} -{}", stat.insertions, stat.deletions)
                            }
                            Err(_) => String::new(),
                        },
                        _ => String::new(),
                    };
                    println!(
                        "{:>3}  {}  {:>10}  {}",
                        i,
                        snapshot.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                        readable_size(snapshot.size_bytes),
                        change
                    );
                }
            }
        }
        Command::Show { file, index } => {
            let content = service.read_snapshot(&absolute(&file)?, index)?;
            io::stdout().write_all(&content)?;
        }
        Command::Diff { file, index } => {
            let file = absolute(&file)?;
            let live = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            print!("{}", service.compare_to_live(&file, index, &live)?);
        }
        Command::DiffPrev { file, index } => {
            print!("{}", service.compare_with_previous(&absolute(&file)?, index)?);
        }
        Command::Restore { file, index } => {
            let file = absolute(&file)?;
            let content = service.restore_snapshot(&file, index)?;
            write_back(&file, &content)?;
            // The write-back is a save like any other.
            service.save_snapshot(&file, &content)?;
            println!("Restored {} from snapshot {}", file.display(), index);
        }
        Command::Forget { file } => {
            let file = absolute(&file)?;
            let removed = service.delete_history(&file)?;
            println!("Deleted {} snapshot(s) of {}", removed, file.display());
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("refusing to delete the local history of all files without --yes");
            }
            service.delete_all_history()?;
            println!("The local history has been deleted for all files.");
        }
        Command::Where { file } => {
            println!("{}", service.storage_dir(&absolute(&file)?)?.display());
        }
        Command::Watch { dir } => {
            let filter = WatchFilter::new(&config.history.history_root, &config.watcher.ignore_patterns)?;
            let queue = SaveQueue::new(
                Arc::new(service),
                config.watcher.workers,
                config.history.save_trigger,
            )?;
            if !config.history.save_trigger.on_save {
                warn!("on-save trigger is disabled; file writes will not be recorded");
            }
            watcher::watch(&dir, &queue, &filter)?;
        }
    }

    Ok(())
}

/// Make `path` absolute, resolving symlinks when the file exists.
fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("resolving current directory")?
        .join(path))
}

/// Replace `file` atomically with `content`.
fn write_back(file: &Path, content: &[u8]) -> Result<()> {
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(file) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(file)
        .with_context(|| format!("writing {}", file.display()))?;
    Ok(())
}
