//! File logging for Cuckoo nodes.
//!
//! The layout follows the usual per-severity convention: rotations are
//! named `{name}.{SEVERITY}.{timestamp}.{pid}` and a `{name}.{SEVERITY}`
//! symlink points at the current file of each severity. A record of
//! severity S lands in every file of severity ≤ S, so the INFO file holds
//! the full picture and the ERROR file only the failures. A background
//! cleaner enforces the retention policy.

mod cleaner;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cuckoo_types::{ErrorCode, LogConfig};
use log::{Level, LevelFilter, Log, Metadata, Record};

pub use cleaner::clean_log_dir;

const SEVERITIES: [&str; 4] = ["INFO", "WARNING", "ERROR", "FATAL"];

fn severity_rank(level: Level) -> usize {
    match level {
        Level::Trace | Level::Debug | Level::Info => 0,
        Level::Warn => 1,
        Level::Error => 2,
    }
}

struct SeverityFile {
    file: Mutex<File>,
}

/// The `log` facade backend writing the per-severity files.
pub struct CuckooLogger {
    files: Vec<SeverityFile>,
    level: LevelFilter,
}

impl CuckooLogger {
    fn open(dir: &Path, name: &str, level: LevelFilter) -> std::io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let pid = std::process::id();
        let mut files = Vec::with_capacity(SEVERITIES.len());
        for severity in SEVERITIES {
            let file_name = format!("{name}.{severity}.{stamp}.{pid}");
            let path = dir.join(&file_name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let link = dir.join(format!("{name}.{severity}"));
            // Replace the current-log symlink.
            let _ = std::fs::remove_file(&link);
            std::os::unix::fs::symlink(&file_name, &link)?;
            files.push(SeverityFile {
                file: Mutex::new(file),
            });
        }
        Ok(Self { files, level })
    }
}

impl Log for CuckooLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Local::now();
        let line = format!(
            "[{}] [CUCKOO] [{}] [{}:{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S %6f"),
            record.level(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            record.args()
        );
        // Fan down: an ERROR line also lands in WARNING and INFO.
        for rank in 0..=severity_rank(record.level()) {
            let mut file = self.files[rank].file.lock().unwrap();
            if let Err(err) = file.write_all(line.as_bytes()) {
                eprintln!("log write failed: {err}");
            }
        }
    }

    fn flush(&self) {
        for severity in &self.files {
            let _ = severity.file.lock().unwrap().flush();
        }
    }
}

/// Owns the log files and the retention cleaner; dropping it stops the
/// cleaner.
pub struct LogHandle {
    stop: Arc<AtomicBool>,
    cleaner: Option<JoinHandle<()>>,
}

impl LogHandle {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.cleaner.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the per-severity files and symlinks under `config.dir`, installs
/// the logger as the global `log` backend, and starts the cleaner.
///
/// The directory must already exist.
pub fn init_log(config: &LogConfig, level: LevelFilter) -> Result<LogHandle, ErrorCode> {
    let logger = build_logger(config, level)?;
    log::set_boxed_logger(Box::new(logger)).map_err(|err| {
        eprintln!("logger already installed: {err}");
        ErrorCode::InitLogFailed
    })?;
    log::set_max_level(level);
    Ok(start_cleaner(config))
}

/// Builds the file logger without installing it globally; useful when the
/// process already owns a `log` backend.
pub fn build_logger(config: &LogConfig, level: LevelFilter) -> Result<CuckooLogger, ErrorCode> {
    let dir = PathBuf::from(&config.dir);
    if !dir.is_dir() {
        eprintln!("log directory {} does not exist", config.dir);
        return Err(ErrorCode::InitLogFailed);
    }
    CuckooLogger::open(&dir, &config.name, level).map_err(|err| {
        eprintln!("cannot open log files under {}: {err}", config.dir);
        ErrorCode::InitLogFailed
    })
}

/// Starts the periodic retention sweep: one pass roughly every 10 minutes,
/// interruptible at 1-second granularity.
pub fn start_cleaner(config: &LogConfig) -> LogHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let cleaner_stop = stop.clone();
    let config = config.clone();
    let cleaner = std::thread::Builder::new()
        .name("cuckoo-log-cleaner".to_string())
        .spawn(move || loop {
            cleaner::clean_log_dir(
                Path::new(&config.dir),
                &config.name,
                config.reserved_num,
                config.reserved_hours,
            );
            for _ in 0..600 {
                if cleaner_stop.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        })
        .expect("failed to spawn log cleaner");
    LogHandle {
        stop,
        cleaner: Some(cleaner),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn logger_creates_files_and_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            dir: dir.path().to_str().unwrap().to_string(),
            name: "cuckoo".to_string(),
            ..Default::default()
        };
        let logger = build_logger(&config, LevelFilter::Info).unwrap();
        for severity in super::SEVERITIES {
            let link = dir.path().join(format!("cuckoo.{severity}"));
            let target = std::fs::read_link(&link).unwrap();
            assert!(dir.path().join(target).is_file());
        }

        logger.log(
            &log::Record::builder()
                .args(format_args!("something went wrong"))
                .level(Level::Error)
                .file(Some("store.rs"))
                .line(Some(42))
                .build(),
        );
        logger.flush();

        // Fan-down: the error shows up in ERROR, WARNING and INFO.
        for severity in ["INFO", "WARNING", "ERROR"] {
            let link = dir.path().join(format!("cuckoo.{severity}"));
            let content = std::fs::read_to_string(&link).unwrap();
            assert!(content.contains("something went wrong"), "{severity}");
            assert!(content.contains("[store.rs:42]"));
        }
        let fatal = std::fs::read_to_string(dir.path().join("cuckoo.FATAL")).unwrap();
        assert!(fatal.is_empty());
    }

    #[test]
    fn init_fails_without_directory() {
        let config = LogConfig {
            dir: "/nonexistent/cuckoo-logs".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_logger(&config, LevelFilter::Info),
            Err(ErrorCode::InitLogFailed)
        ));
    }
}
