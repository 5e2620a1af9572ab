//! Prefetching read stream: a ring of pipes filled by a background pusher.
//!
//! The pusher walks logical blocks `0..file_blocks` in order, one pipe per
//! block, then pushes a terminal end marker. The consumer cursor
//! (`pipe_index`) advances only when a pipe's block is fully drained, so
//! reads smaller than a block keep their position inside the current pipe
//! and reads spanning blocks consume pipes sequentially. The pusher can
//! never run more than `pipe_num` blocks ahead: each pipe holds one block
//! and is not refilled until drained.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use cuckoo_types::ErrorCode;
use metrics::counter;

use crate::metrics::BLOCKS_PREFETCHED;
use crate::open_instance::OpenInstance;
use crate::pipe::{BlockFetcher, Pipe};

pub struct ReadStream {
    pipes: Vec<Arc<Pipe>>,
    pipe_index: AtomicUsize,
    file_blocks: u64,
    pusher: Mutex<Option<JoinHandle<()>>>,
}

impl ReadStream {
    /// A ring of `pipe_num` pipes of one `block_size` block each, covering
    /// a file of `file_blocks` logical blocks.
    pub fn new(file_blocks: u64, block_size: usize, pipe_num: usize) -> Self {
        assert!(pipe_num >= 1);
        Self {
            pipes: (0..pipe_num).map(|_| Arc::new(Pipe::new(block_size))).collect(),
            pipe_index: AtomicUsize::new(0),
            file_blocks,
            pusher: Mutex::new(None),
        }
    }

    pub fn pipe_num(&self) -> usize {
        self.pipes.len()
    }

    /// Consumer cursor, visible for diagnostics and tests.
    pub fn pipe_index(&self) -> usize {
        self.pipe_index.load(Ordering::Acquire)
    }

    /// Spawns the pusher. `inst` is held weakly: if the open instance goes
    /// away the pusher stops instead of keeping it alive.
    pub fn start_push_threaded(
        &self,
        fetcher: Arc<dyn BlockFetcher>,
        inst: Weak<OpenInstance>,
    ) {
        let pipes = self.pipes.clone();
        let file_blocks = self.file_blocks;
        let thread = std::thread::Builder::new()
            .name("cuckoo-read-pusher".to_string())
            .spawn(move || {
                let mut push_index = 0;
                for block_index in 0..file_blocks {
                    let Some(inst) = inst.upgrade() else {
                        return;
                    };
                    match pipes[push_index].wait_push(fetcher.as_ref(), &inst, block_index) {
                        Ok(_) => counter!(BLOCKS_PREFETCHED).increment(1),
                        Err(code) => {
                            // A failed fetch ends the stream early; the
                            // reader sees a short byte count.
                            log::error!(
                                "prefetch of block {block_index} for inode {} failed: {code}",
                                inst.inode_id
                            );
                            break;
                        }
                    }
                    push_index = (push_index + 1) % pipes.len();
                }
                let _ = pipes[push_index].push_end();
            })
            .expect("failed to spawn read pusher");
        *self.pusher.lock().unwrap() = Some(thread);
    }

    /// Pops up to `out.len()` sequential bytes. Returns the bytes
    /// delivered, which falls short of the request only at end of stream.
    ///
    /// Single-consumer: the store engine serializes callers.
    pub fn wait_pop(&self, out: &mut [u8]) -> Result<usize, ErrorCode> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut total = 0;
        while total < out.len() {
            let index = self.pipe_index.load(Ordering::Acquire);
            let res = self.pipes[index].wait_pop(&mut out[total..]);
            total += res.bytes;
            if res.end {
                break;
            }
            if res.drained {
                self.pipe_index
                    .store((index + 1) % self.pipes.len(), Ordering::Release);
            }
        }
        Ok(total)
    }

    /// Stops the pusher and wakes anything still blocked on a pipe.
    pub fn close(&self) {
        for pipe in &self.pipes {
            pipe.destroy();
        }
        if let Some(thread) = self.pusher.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ReadStream {
    fn drop(&mut self) {
        self.close();
    }
}
