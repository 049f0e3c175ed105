//! mirror - Command-line front end for the incremental backup engine.
//!
//! Loads the configuration, sets up log sinks, waits briefly for source and
//! destination drives, runs one backup pass and prints a summary.

mod logging;

use clap::Parser;
use engine::{
    wait_for_roots, BackupConfig, BackupRun, CopyOutcome, CopyStatus, FsAvailability,
    IgnoreRules, ListingIndex, ProgressCallback, RunReport, RunStats,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::logging::{setup_logging, LogFiles};

const ROOT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// mirror - Incremental mirror backup
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(version)]
#[command(about = "Copy new and changed files from source roots to backup destinations")]
struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(long, value_name = "PATH", default_value = "config/config.json")]
    config: PathBuf,

    /// Ignore rule file, overrides the configured one
    #[arg(long, value_name = "PATH")]
    ignore_file: Option<PathBuf>,

    /// JSON file index to list sources from before walking
    #[arg(long, value_name = "PATH")]
    index: Option<PathBuf>,

    /// Log directory, overrides the configured one
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,

    /// Seconds to wait for unavailable roots before starting
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    wait_secs: u64,

    /// Print every file as it completes
    #[arg(long)]
    verbose: bool,

    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

/// CLI implementation of ProgressCallback for displaying backup progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_progress_update: Mutex<Instant>,
    total_files: AtomicUsize,
    files_done: AtomicUsize,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        let now = Instant::now();
        CliProgress {
            verbose,
            start_time: now,
            last_progress_update: Mutex::new(now),
            total_files: AtomicUsize::new(0),
            files_done: AtomicUsize::new(0),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    fn file_name(path: &Path) -> &str {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("(unknown)")
    }
}

impl ProgressCallback for CliProgress {
    fn on_run_started(&self, run_id: Uuid, total_units: usize, total_files: usize) {
        self.total_files.store(total_files, Ordering::Relaxed);
        eprintln!("Starting backup run {}", run_id);
        eprintln!("  {} files in {} units", total_files, total_units);
        eprintln!();
    }

    fn on_file_completed(&self, outcome: &CopyOutcome) {
        let done = self.files_done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.verbose {
            let status = match outcome.status {
                CopyStatus::Copied => "Copied",
                CopyStatus::Skipped => "Skipped",
                CopyStatus::Failed => "Failed",
            };
            eprintln!("[{:5}] {}: {}", done, status, Self::file_name(outcome.source_path()));
            return;
        }

        // Throttle progress updates to avoid spam (max once per 200ms)
        let Ok(mut last) = self.last_progress_update.lock() else {
            return;
        };
        if last.elapsed().as_millis() < 200 {
            return;
        }
        *last = Instant::now();

        let total = self.total_files.load(Ordering::Relaxed).max(1);
        let percent = (done as f64 / total as f64 * 100.0) as u32;
        eprint!(
            "\rProgress: {} | {}/{} files",
            Self::print_progress_bar(percent),
            done,
            total
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_unit_completed(&self, _completed: usize, _total: usize) {}

    fn on_run_completed(&self, stats: &RunStats) {
        if !self.verbose {
            eprintln!("\rProgress: {}", Self::print_progress_bar(100));
        }
        eprintln!(
            "Copy phase complete in {}: {} copied, {} failed",
            Self::format_duration(self.start_time.elapsed()),
            stats.copied,
            stats.failed
        );
    }
}

fn print_summary(report: &RunReport, logs: Option<&LogFiles>) {
    let stats = &report.stats;
    let elapsed = report.elapsed().to_std().unwrap_or_default();

    eprintln!();
    if report.aborted {
        eprintln!("Backup stopped early.");
    } else {
        eprintln!("Backup complete!");
    }
    eprintln!(
        "Summary: {} copied, {} skipped, {} failed",
        stats.copied, stats.skipped, stats.failed
    );
    eprintln!(
        "Skipped: {} unchanged, {} too large, {} path too long",
        stats.skipped_unchanged, stats.skipped_too_large, stats.skipped_too_long
    );
    eprintln!(
        "Verification: {} OK, {} mismatch",
        stats.verified_ok, stats.verified_fail
    );
    if stats.soft_errors > 0 {
        eprintln!("Unreadable entries during scan: {}", stats.soft_errors);
    }
    eprintln!("Bytes copied: {}", CliProgress::format_bytes(stats.bytes_copied));
    eprintln!("Elapsed: {}", CliProgress::format_duration(elapsed));

    if !report.unavailable_roots.is_empty() {
        eprintln!();
        eprintln!("Unavailable roots (mapping skipped):");
        for root in &report.unavailable_roots {
            eprintln!("  {}", root.display());
        }
    }
    if !report.lost_destinations.is_empty() {
        eprintln!();
        eprintln!("Destinations lost during the copy (remaining files not copied):");
        for root in &report.lost_destinations {
            eprintln!("  {}", root.display());
        }
    }

    let mismatches: Vec<_> = report.verification_failures().collect();
    if !mismatches.is_empty() {
        eprintln!();
        eprintln!("Verification mismatches:");
        for result in mismatches {
            eprintln!(
                "  {}: {}",
                result.path.display(),
                result.mismatch_reason.as_deref().unwrap_or("(unknown)")
            );
        }
    }

    if let Some(logs) = logs {
        eprintln!();
        eprintln!("Run log: {}", logs.run.display());
        eprintln!("Debug log: {}", logs.debug.display());
        if stats.failed > 0 || stats.soft_errors > 0 {
            eprintln!("Lost files: {}", logs.lost.display());
        }
    }
}

/// Parse arguments, set up logging, then run one backup pass
fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            std::process::exit(2);
        }
    };

    let logs = match setup_logging(&config.log_dir, args.verbose) {
        Ok(logs) => Some(logs),
        Err(msg) => {
            eprintln!("Warning: {}; logging to console only", msg);
            None
        }
    };

    // Exit code tracking
    let exit_code = match run_cli(&args, config) {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error: cannot serialize report: {}", e),
                }
            } else {
                print_summary(&report, logs.as_ref());
            }
            0
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Load the configuration file and apply command-line overrides
fn load_config(args: &Args) -> Result<BackupConfig, String> {
    let mut config = BackupConfig::load_or_create(&args.config).map_err(|e| e.to_string())?;
    if let Some(ignore_file) = &args.ignore_file {
        config.ignore_file = ignore_file.clone();
    }
    if let Some(index) = &args.index {
        config.index_file = Some(index.clone());
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = log_dir.clone();
    }
    Ok(config)
}

/// Roots worth waiting for: every source root, and the drive or parent
/// directory of every destination root (the root itself is created on demand).
fn roots_to_wait_for(config: &BackupConfig) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = config.sources.keys().cloned().collect();
    for dst in config.sources.values() {
        let anchor = dst
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(dst.as_path());
        if !roots.iter().any(|r| r == anchor) {
            roots.push(anchor.to_path_buf());
        }
    }
    roots
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, config: BackupConfig) -> Result<RunReport, String> {
    config.validate().map_err(|e| e.to_string())?;
    let rules = IgnoreRules::load_or_create(&config.ignore_file).map_err(|e| e.to_string())?;

    let pending = wait_for_roots(
        &FsAvailability,
        &roots_to_wait_for(&config),
        Duration::from_secs(args.wait_secs),
        ROOT_POLL_INTERVAL,
    );
    if !pending.is_empty() {
        tracing::warn!(count = pending.len(), "Starting with unavailable roots");
    }

    let index = config.index_file.clone();
    let mut run = BackupRun::new(config, rules)
        .with_progress(Arc::new(CliProgress::new(args.verbose && !args.json)));
    if let Some(index) = index {
        run = run.with_index(ListingIndex::new(index));
    }

    run.execute().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args_for(config: PathBuf) -> Args {
        Args {
            config,
            ignore_file: None,
            index: None,
            log_dir: None,
            wait_secs: 0,
            verbose: false,
            json: false,
        }
    }

    fn write_config(dir: &Path, src: &Path, dst: &Path) -> PathBuf {
        let path = dir.join("config.json");
        let mut sources = serde_json::Map::new();
        sources.insert(src.to_string_lossy().into_owned(), serde_json::json!(dst));
        let json = serde_json::json!({
            "sources": sources,
            "ignore_file": dir.join("ignore.txt"),
            "log_dir": dir.join("logs"),
        });
        std::fs::write(&path, json.to_string()).expect("Failed to write config");
        path
    }

    #[test]
    fn test_cli_runs_a_backup() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("src");
        let dst = work.path().join("dst");
        std::fs::create_dir_all(&src).expect("Failed to create src");
        std::fs::write(src.join("test.txt"), "hello").expect("Failed to write file");
        std::fs::write(src.join("notes.tmp"), "scratch").expect("Failed to write file");

        let args = args_for(write_config(work.path(), &src, &dst));
        let config = load_config(&args).expect("config loads");
        let report = run_cli(&args, config).expect("CLI should succeed");

        assert_eq!(report.stats.copied, 1);
        assert!(dst.join("test.txt").exists());
        // default ignore rules were written and applied
        assert!(work.path().join("ignore.txt").exists());
        assert!(!dst.join("notes.tmp").exists());
    }

    #[test]
    fn test_cli_creates_default_config() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let path = work.path().join("config").join("config.json");
        let args = args_for(path.clone());

        let config = load_config(&args).expect("default config is created");
        assert!(path.exists());
        // the default configuration has no sources, so the run is refused
        assert!(run_cli(&args, config).is_err());
    }

    #[test]
    fn test_cli_rejects_malformed_config() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let path = work.path().join("config.json");
        std::fs::write(&path, "{ \"sources\": [").expect("Failed to write config");
        assert!(load_config(&args_for(path)).is_err());
    }

    #[test]
    fn test_cli_overrides_apply() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let path = write_config(work.path(), Path::new("/a"), Path::new("/b"));
        let mut args = args_for(path);
        args.ignore_file = Some(PathBuf::from("rules.txt"));
        args.index = Some(PathBuf::from("index.json"));
        args.log_dir = Some(PathBuf::from("elsewhere"));

        let config = load_config(&args).expect("config loads");
        assert_eq!(config.ignore_file, PathBuf::from("rules.txt"));
        assert_eq!(config.index_file, Some(PathBuf::from("index.json")));
        assert_eq!(config.log_dir, PathBuf::from("elsewhere"));
    }

    #[test]
    fn test_cli_succeeds_with_unavailable_source() {
        let work = TempDir::new().expect("Failed to create temp dir");
        let src = work.path().join("offline");
        let dst = work.path().join("dst");
        let args = args_for(write_config(work.path(), &src, &dst));

        let config = load_config(&args).expect("config loads");
        let report = run_cli(&args, config).expect("run completes");
        assert_eq!(report.unavailable_roots, vec![src]);
    }

    #[test]
    fn test_wait_roots_use_destination_parent() {
        let mut config = BackupConfig::default();
        config
            .sources
            .insert(PathBuf::from("/data"), PathBuf::from("/mnt/backup/data"));
        assert_eq!(
            roots_to_wait_for(&config),
            vec![PathBuf::from("/data"), PathBuf::from("/mnt/backup")]
        );
    }

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(1536), "1.50 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::print_progress_bar(50), "[==========          ] 50%");
        assert_eq!(CliProgress::print_progress_bar(250), format!("[{}] 100%", "=".repeat(20)));
    }
}
