//! Session logger.
//!
//! With `log_file` configured, every record goes to that file, which is
//! **truncated at each launch** so it only ever holds the most recent
//! session. Without one, records go to stderr through `env_logger`
//! (`RUST_LOG` still refines the filter).
//!
//! Either way the crate logs through the `log` macros.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

use crate::settings::Settings;

struct SessionLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // I/O errors are dropped so logging never takes the process down.
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", format_line(&timestamp(), record.level().as_str(), &record.args().to_string()));
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install the global logger. Safe to call more than once; later calls are
/// ignored by `log`.
pub fn init(settings: &Settings) {
    if let Some(path) = &settings.log_file {
        if init_file(path, settings.log_level).is_ok() {
            return;
        }
    }
    let _ = env_logger::Builder::new()
        .filter_level(settings.log_level)
        .parse_default_env()
        .format_timestamp_secs()
        .try_init();
}

/// Open (truncating) `path`, install the session logger, and mirror panics
/// into the file before running the default hook.
fn init_file(path: &Path, level: LevelFilter) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .inspect_err(|e| eprintln!("[logger] Failed to open log file {:?}: {}", path, e))?;

    let logger = SessionLogger {
        file: Mutex::new(file),
        level,
    };
    if log::set_boxed_logger(Box::new(logger)).is_err() {
        // another logger already owns the facade
        return Ok(());
    }
    log::set_max_level(level);

    log::info!("=== layerlab session started (unix {}) ===", unix_seconds());
    log::info!("Log file: {}", path.display());

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC: {}", info);
        log::logger().flush();
        prev(info);
    }));
    Ok(())
}

fn format_line(ts: &str, level: &str, msg: &str) -> String {
    format!("[{}] [{}] {}", ts, level, msg)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `HH:MM:SS` within the current (UTC) day.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => clock(d.as_secs()),
        Err(_) => "??:??:??".to_string(),
    }
}

fn clock(secs: u64) -> String {
    let h = (secs % 86400) / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}
