//! The denormalized per-item record shared by client and database sides.

use cuckoo_types::{ErrorCode, FileStat};

/// One directory entry returned by `ReadDir`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub file_name: String,
    pub mode: u32,
}

/// Per-item metadata job record.
///
/// Which fields are populated depends on the service kind; the codec
/// documents the per-kind subsets. The database side reads the parameter
/// fields and writes the response fields plus `error_code`; a batch never
/// fails fast, so `error_code` is meaningful for every item individually.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaProcessInfo {
    /// Primary path of the operation. `PlainCommand` carries its command
    /// text here.
    pub path: String,
    pub parent_id: u64,
    pub parent_id_part_id: u32,
    pub name: String,

    /// Rename destination fields. `dst_parent_id` and
    /// `dst_parent_id_part_id` are distinct: the former names the inode,
    /// the latter the shard partition it lives on.
    pub dst_path: String,
    pub dst_name: String,
    pub dst_parent_id: u64,
    pub dst_parent_id_part_id: u32,

    pub inode_id: u64,
    pub node_id: i32,
    pub stat: FileStat,

    pub readdir_max_read_count: i32,
    pub readdir_last_shard_index: i32,
    pub readdir_last_file_name: String,
    pub readdir_entries: Vec<DirEntry>,

    pub target_is_directory: bool,
    pub src_lock_order: i32,

    /// Textual output of a `PlainCommand`.
    pub plain_response: String,

    pub error_code: ErrorCode,
}

impl MetaProcessInfo {
    /// A parameter record carrying only a path, the shape used by most
    /// single-phase operations.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
