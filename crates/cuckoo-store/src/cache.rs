//! On-disk cache layout.
//!
//! Payload files are hashed into `total_directory` buckets:
//! `{root}/{inode % total_directory}/{inode}-large`. Buckets are
//! pre-created at startup so the data path never races on `mkdir`.

use std::path::{Path, PathBuf};

/// Cache file path of one inode.
pub fn file_path(root: &Path, total_directory: u32, inode_id: u64) -> PathBuf {
    let bucket = inode_id % u64::from(total_directory);
    root.join(bucket.to_string())
        .join(format!("{inode_id}-large"))
}

/// Creates the cache root and every bucket directory.
pub fn prepare_buckets(root: &Path, total_directory: u32) -> std::io::Result<()> {
    for bucket in 0..total_directory {
        std::fs::create_dir_all(root.join(bucket.to_string()))?;
    }
    Ok(())
}
