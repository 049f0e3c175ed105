//! Log sinks for a backup run.
//!
//! Three files are written under the log directory, split by tracing target:
//! - `debug.log`: every event at DEBUG and above
//! - `run_<timestamp>.log`: the run stream (start, per-file results, totals)
//! - `lost_files.log`: files that could not be found or read
//!
//! The console gets warnings only, or INFO with `--verbose`; `RUST_LOG`
//! overrides both.

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Locations of the log files of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    pub debug: PathBuf,
    pub run: PathBuf,
    pub lost: PathBuf,
}

impl LogFiles {
    pub fn new(dir: &Path, started: DateTime<Local>) -> Self {
        LogFiles {
            debug: dir.join("debug.log"),
            run: dir.join(format!("run_{}.log", started.format("%Y%m%d_%H%M%S"))),
            lost: dir.join("lost_files.log"),
        }
    }
}

fn open_append(path: &Path) -> Result<Mutex<File>, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Mutex::new)
        .map_err(|e| format!("Cannot open log file {}: {}", path.display(), e))
}

/// Install the global subscriber. Call once per process.
pub fn setup_logging(dir: &Path, verbose: bool) -> Result<LogFiles, String> {
    fs::create_dir_all(dir)
        .map_err(|e| format!("Cannot create log directory {}: {}", dir.display(), e))?;
    let files = LogFiles::new(dir, Local::now());

    let debug_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(open_append(&files.debug)?)
        .with_filter(Targets::new().with_default(Level::DEBUG));

    let run_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(open_append(&files.run)?)
        .with_filter(Targets::new().with_target(engine::RUN_TARGET, Level::INFO));

    let lost_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_level(false)
        .with_writer(open_append(&files.lost)?)
        .with_filter(Targets::new().with_target(engine::LOST_TARGET, Level::WARN));

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new(format!("info,{}=off", engine::LOST_TARGET))
        } else {
            EnvFilter::new(format!("warn,{}=off", engine::LOST_TARGET))
        }
    });
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(debug_layer)
        .with(run_layer)
        .with(lost_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| format!("Cannot install log subscriber: {}", e))?;

    Ok(files)
}
