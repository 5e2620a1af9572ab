//! Retention sweep of the log directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::SEVERITIES;

/// One retention pass over `dir`.
///
/// Regular files whose names start with `name` are candidates, except the
/// targets of the current-log symlinks. Candidates older than
/// `reserved_hours` are deleted; if more than `reserved_num` younger files
/// survive, the oldest are deleted until the count fits. Symlinks are
/// never followed (`symlink_metadata` guards against a racing `d_type`),
/// and per-file errors are logged and skipped, never fatal.
pub fn clean_log_dir(dir: &Path, name: &str, reserved_num: usize, reserved_hours: u64) {
    let exclude = current_log_targets(dir, name);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::error!("cannot read log directory {dir:?}: {err}");
            return;
        }
    };

    let now = SystemTime::now();
    let horizon = Duration::from_secs(reserved_hours * 3600);
    let mut survivors: Vec<(PathBuf, SystemTime)> = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("readdir failed in {dir:?}: {err}");
                continue;
            }
        };
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.starts_with(name) || exclude.contains(file_name) {
            continue;
        }
        let path = entry.path();
        // lstat: never follow symlinks, whatever d_type claimed.
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                log::error!("{path:?} lstat failed: {err}");
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        let mtime = match meta.modified() {
            Ok(mtime) => mtime,
            Err(err) => {
                log::error!("{path:?} has no mtime: {err}");
                continue;
            }
        };
        let age = now.duration_since(mtime).unwrap_or(Duration::ZERO);
        if age > horizon {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("deleted (older than retention): {path:?}"),
                Err(err) => log::error!("failed to delete {path:?}: {err}"),
            }
            continue;
        }
        survivors.push((path, mtime));
    }

    if survivors.len() > reserved_num {
        survivors.sort_by_key(|(_, mtime)| *mtime);
        let excess = survivors.len() - reserved_num;
        for (path, _) in survivors.into_iter().take(excess) {
            match std::fs::remove_file(&path) {
                Ok(()) => log::info!("deleted (exceeds retention count): {path:?}"),
                Err(err) => log::error!("failed to delete {path:?}: {err}"),
            }
        }
    }
}

/// Basenames the current-log symlinks point at.
fn current_log_targets(dir: &Path, name: &str) -> HashSet<String> {
    let mut targets = HashSet::new();
    for severity in SEVERITIES {
        let link = dir.join(format!("{name}.{severity}"));
        match std::fs::read_link(&link) {
            Ok(target) => {
                if let Some(base) = target.file_name().and_then(|n| n.to_str()) {
                    targets.insert(base.to_string());
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => log::error!("{link:?}: {err}"),
        }
        // The symlink itself is also never a deletion candidate.
        targets.insert(format!("{name}.{severity}"));
    }
    targets
}
