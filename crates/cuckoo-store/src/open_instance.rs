//! The client-side open-file handle.

use std::fs::File;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use crate::read_stream::ReadStream;
use crate::write_stream::WriteStream;

pub(crate) struct ReadState {
    /// Lazily created prefetch stream for large sequential reads.
    pub stream: Option<Arc<ReadStream>>,
    /// Bytes already consumed from the stream; the engine merges or skips
    /// against this when a read arrives at a different offset.
    pub pos: u64,
}

/// One open file.
///
/// The handle is exclusively owned by its caller for its lifetime: the
/// engine reads the plain fields under the caller's guarantee that no
/// concurrent close occurs, while the streams and `current_size` carry
/// their own synchronization for concurrent reads and writes.
pub struct OpenInstance {
    pub inode_id: u64,
    /// The node owning this inode's payload; compared against the local
    /// node id to pick the local-disk or peer path.
    pub node_id: i32,
    pub path: String,
    /// POSIX open flags (`libc::O_RDONLY` and friends).
    pub oflags: i32,
    /// File size at open time.
    pub original_size: u64,
    /// Post-write file size; advanced with `fetch_max` so concurrent
    /// writers publish the union of their committed tails.
    pub current_size: AtomicU64,
    /// Whole-file buffer for the small-file fast path; reads are served
    /// straight from it once populated.
    pub read_buffer: Mutex<Option<Arc<Vec<u8>>>>,
    pub write_stream: WriteStream,
    pub(crate) read_state: Mutex<ReadState>,
    pub(crate) local_file: Mutex<Option<File>>,
}

impl OpenInstance {
    pub fn new(inode_id: u64, node_id: i32, path: impl Into<String>, oflags: i32) -> Self {
        Self {
            inode_id,
            node_id,
            path: path.into(),
            oflags,
            original_size: 0,
            current_size: AtomicU64::new(0),
            read_buffer: Mutex::new(None),
            write_stream: WriteStream::new(),
            read_state: Mutex::new(ReadState {
                stream: None,
                pos: 0,
            }),
            local_file: Mutex::new(None),
        }
    }

    /// The active read stream, if any.
    pub fn read_stream(&self) -> Option<Arc<ReadStream>> {
        self.read_state.lock().unwrap().stream.clone()
    }
}
