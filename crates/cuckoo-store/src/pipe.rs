//! Bounded single-producer/single-consumer byte channel.
//!
//! A pipe holds at most one logical block. The producer fetches the block
//! through the routing seam ([`BlockFetcher`]) while holding the buffer;
//! the consumer drains it in arbitrarily sized pops. `end` is the
//! end-of-stream marker: once it is set and the buffer drained, every
//! further pop returns 0 bytes with the flag raised.

use std::sync::{Condvar, Mutex};

use cuckoo_types::ErrorCode;

use crate::open_instance::OpenInstance;

/// Routing seam of the producer side: reads one logical block of an open
/// file from wherever it lives (local disk, peer node, object store).
pub trait BlockFetcher: Send + Sync {
    /// Fills `buf` with block `block_index`; returns the byte count, which
    /// is 0 when the block starts at or past end of file.
    fn fetch_block(
        &self,
        inst: &OpenInstance,
        block_index: u64,
        buf: &mut [u8],
    ) -> Result<usize, ErrorCode>;
}

/// Outcome of one pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopResult {
    pub bytes: usize,
    /// End of stream: the pipe carries the terminal marker and is drained.
    pub end: bool,
    /// This pipe's block is fully consumed; the consumer moves on.
    pub drained: bool,
}

struct PipeState {
    buf: Vec<u8>,
    start: usize,
    filled: usize,
    end: bool,
    destroyed: bool,
}

pub struct Pipe {
    state: Mutex<PipeState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Pipe {
    /// A pipe holding one block of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PipeState {
                buf: vec![0; capacity],
                start: 0,
                filled: 0,
                end: false,
                destroyed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Producer: waits until the pipe is empty, fetches block
    /// `block_index` into it, and signals the consumer. Returns the bytes
    /// pushed; a fetch of 0 bytes (past end of file) sets the end marker
    /// instead.
    pub fn wait_push(
        &self,
        fetcher: &dyn BlockFetcher,
        inst: &OpenInstance,
        block_index: u64,
    ) -> Result<usize, ErrorCode> {
        let mut state = self.state.lock().unwrap();
        while state.filled > 0 && !state.destroyed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.destroyed {
            return Err(ErrorCode::IoError);
        }
        let capacity = state.buf.len();
        let pushed = fetcher.fetch_block(inst, block_index, &mut state.buf[..capacity])?;
        if pushed == 0 {
            state.end = true;
        } else {
            state.start = 0;
            state.filled = pushed;
        }
        self.not_empty.notify_one();
        Ok(pushed)
    }

    /// Producer: marks end of stream once the pipe is empty.
    pub fn push_end(&self) -> Result<(), ErrorCode> {
        let mut state = self.state.lock().unwrap();
        while state.filled > 0 && !state.destroyed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.destroyed {
            return Err(ErrorCode::IoError);
        }
        state.end = true;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Consumer: waits for data (or the end marker) and copies up to
    /// `out.len()` bytes. Leftover bytes stay in the pipe for the next pop.
    pub fn wait_pop(&self, out: &mut [u8]) -> PopResult {
        let mut state = self.state.lock().unwrap();
        while state.filled == 0 && !state.end && !state.destroyed {
            state = self.not_empty.wait(state).unwrap();
        }
        if state.destroyed || (state.end && state.filled == 0) {
            return PopResult {
                bytes: 0,
                end: true,
                drained: true,
            };
        }
        let n = out.len().min(state.filled);
        out[..n].copy_from_slice(&state.buf[state.start..state.start + n]);
        state.start += n;
        state.filled -= n;
        let drained = state.filled == 0;
        if drained {
            state.start = 0;
            self.not_full.notify_one();
        }
        PopResult {
            bytes: n,
            end: state.end && drained,
            drained,
        }
    }

    /// Wakes every blocked party into a terminal state.
    pub fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.destroyed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    /// Serves a fixed byte pattern as a sequence of blocks.
    pub(crate) struct PatternFetcher {
        pub data: Vec<u8>,
        pub block_size: usize,
    }

    impl BlockFetcher for PatternFetcher {
        fn fetch_block(
            &self,
            _inst: &OpenInstance,
            block_index: u64,
            buf: &mut [u8],
        ) -> Result<usize, ErrorCode> {
            let offset = block_index as usize * self.block_size;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = self.block_size.min(self.data.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }
    }

    fn inst() -> OpenInstance {
        OpenInstance::new(100, 0, "/pipe-test", libc::O_RDONLY)
    }

    #[test]
    fn push_then_pop_round_trips_in_order() {
        let block_size = 64;
        let data: Vec<u8> = (0..64u8).collect();
        let fetcher = PatternFetcher {
            data: data.clone(),
            block_size,
        };
        let pipe = Pipe::new(block_size);
        let inst = inst();

        assert_eq!(pipe.wait_push(&fetcher, &inst, 0).unwrap(), block_size);

        let mut out = vec![0u8; 32];
        let first = pipe.wait_pop(&mut out);
        assert_eq!(first.bytes, 32);
        assert!(!first.end);
        assert!(!first.drained);
        assert_eq!(out, data[..32]);

        let second = pipe.wait_pop(&mut out);
        assert_eq!(second.bytes, 32);
        assert!(second.drained);
        assert!(!second.end);
        assert_eq!(out, data[32..]);
    }

    #[test]
    fn pops_after_end_return_zero_forever() {
        let pipe = Pipe::new(16);
        pipe.push_end().unwrap();
        let mut out = vec![0u8; 16];
        for _ in 0..3 {
            let res = pipe.wait_pop(&mut out);
            assert_eq!(res.bytes, 0);
            assert!(res.end);
        }
    }

    #[test]
    fn past_eof_push_marks_end() {
        let fetcher = PatternFetcher {
            data: vec![7; 10],
            block_size: 16,
        };
        let pipe = Pipe::new(16);
        let inst = inst();
        assert_eq!(pipe.wait_push(&fetcher, &inst, 5).unwrap(), 0);
        let res = pipe.wait_pop(&mut [0u8; 4]);
        assert_eq!(res.bytes, 0);
        assert!(res.end);
    }

    #[test]
    fn destroy_wakes_blocked_consumer() {
        let pipe = Arc::new(Pipe::new(8));
        let consumer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || pipe.wait_pop(&mut [0u8; 8]))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        pipe.destroy();
        let res = consumer.join().unwrap();
        assert_eq!(res.bytes, 0);
        assert!(res.end);
    }
}
