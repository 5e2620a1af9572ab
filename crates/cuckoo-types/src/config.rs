//! Cuckoo configuration.
//!
//! The configuration tree is deserialized from a YAML file. Every field has
//! a default so a partial file (or none at all) yields a runnable test
//! configuration; production deployments override the interesting keys.

use serde::{Deserialize, Serialize};

/// Default value of [`CuckooConfig::block_size`]: 4 MiB.
pub const fn default_block_size() -> u32 {
    4 << 20
}

/// Default value of [`CuckooConfig::big_file_read_size`].
///
/// This is the prefetch window of a read stream; `big_file_read_size /
/// block_size` is the number of pipes in the ring.
pub const fn default_big_file_read_size() -> u32 {
    16 << 20
}

/// Default value of [`CuckooConfig::stream_max_size`]: the write-back
/// coalescing bound. A single write at or above this size goes straight
/// through to the backing store.
pub const fn default_stream_max_size() -> u32 {
    8 << 20
}

/// Default number of hash buckets under the cache root.
pub const fn default_total_directory() -> u32 {
    100
}

pub const fn default_conn_pool_size() -> usize {
    8
}

pub const fn default_pending_task_buffer_max_size() -> u16 {
    64
}

pub const fn default_batch_task_buffer_max_size() -> u16 {
    32
}

fn default_cache_root() -> String {
    "/tmp/cuckoo-cache".to_string()
}

fn default_cluster_view() -> String {
    "127.0.0.1:56039".to_string()
}

/// Top-level configuration for one Cuckoo store node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuckooConfig {
    /// Root directory of the on-disk payload cache (`CUCKOO_CACHE_ROOT`).
    pub cache_root: String,

    /// Comma-separated `ip:port` data endpoints of every node in the
    /// cluster, indexed by node id (`CUCKOO_CLUSTER_VIEW`).
    pub cluster_view: String,

    /// This node's index into the cluster view (`CUCKOO_NODE_ID`).
    pub node_id: i32,

    /// Streaming I/O unit (`CUCKOO_BLOCK_SIZE`).
    pub block_size: u32,

    /// Read-stream prefetch window (`CUCKOO_BIG_FILE_READ_SIZE`).
    pub big_file_read_size: u32,

    /// Write-back buffer bound (`CUCKOO_STORE_STREAM_MAX_SIZE`).
    pub stream_max_size: u32,

    /// Number of hash buckets pre-created under the cache root.
    pub total_directory: u32,

    /// Worker connections per metadata connection pool.
    pub conn_pool_size: usize,

    /// Bound on the pool's pending-task FIFO.
    pub pending_task_buffer_max_size: u16,

    /// Bound on one batch accumulator slot, in items.
    pub batch_task_buffer_max_size: u16,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for CuckooConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            cluster_view: default_cluster_view(),
            node_id: 0,
            block_size: default_block_size(),
            big_file_read_size: default_big_file_read_size(),
            stream_max_size: default_stream_max_size(),
            total_directory: default_total_directory(),
            conn_pool_size: default_conn_pool_size(),
            pending_task_buffer_max_size: default_pending_task_buffer_max_size(),
            batch_task_buffer_max_size: default_batch_task_buffer_max_size(),
            log: LogConfig::default(),
        }
    }
}

impl CuckooConfig {
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).expect("config serialization cannot fail")
    }

    /// The cluster view split into per-node endpoints, indexed by node id.
    pub fn views(&self) -> Vec<String> {
        self.cluster_view
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn default_log_dir() -> String {
    "/var/log/cuckoo".to_string()
}

fn default_log_name() -> String {
    "cuckoo".to_string()
}

pub const fn default_reserved_num() -> usize {
    10
}

/// Default retention horizon for rotated log files, in hours.
pub const fn default_reserved_hours() -> u64 {
    72
}

/// Logging configuration: file layout and retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory holding the `cuckoo*` log files and current-log symlinks.
    pub dir: String,

    /// Base name of log files; also the cleaner's file-name prefix.
    pub name: String,

    /// Rotated files kept per sweep beyond the age horizon.
    pub reserved_num: usize,

    /// Age horizon in hours; older files are deleted first.
    pub reserved_hours: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            name: default_log_name(),
            reserved_num: default_reserved_num(),
            reserved_hours: default_reserved_hours(),
        }
    }
}
