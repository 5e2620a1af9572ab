//! The POSIX stat block carried in metadata responses.

use serde::{Deserialize, Serialize};

/// Denormalized `struct stat` fields as the metadata plane stores them.
///
/// Timestamps are nanoseconds since the epoch, packed into `i64` the same
/// way on the wire and in the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub st_ino: u64,
    pub st_dev: u64,
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atim: i64,
    pub st_mtim: i64,
    pub st_ctim: i64,
}
