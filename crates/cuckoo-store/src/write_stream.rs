//! Coalescing write buffer with write-through fallback.
//!
//! Contiguous writes are absorbed into one buffered region
//! `[begin, begin + len)`; a write landing inside the region overwrites in
//! place, so the buffered coverage is the union of every absorbed write.
//! A write that cannot extend the region (a gap, or growth past the
//! stream bound) flushes first; a single write at or above the bound goes
//! straight through to the backing store without buffering.

use std::sync::Mutex;

use cuckoo_types::ErrorCode;

use crate::open_instance::OpenInstance;

/// The backing-store seam flushes go through: local file or peer node,
/// decided by the engine's locality routing.
pub trait WriteSink: Send + Sync {
    fn write_at(&self, inst: &OpenInstance, data: &[u8], offset: u64)
        -> Result<(), ErrorCode>;
}

struct WriteBuf {
    buf: Vec<u8>,
    begin: u64,
}

pub struct WriteStream {
    state: Mutex<WriteBuf>,
}

impl Default for WriteStream {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteStream {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WriteBuf {
                buf: Vec::new(),
                begin: 0,
            }),
        }
    }

    /// Currently buffered byte count.
    pub fn size(&self) -> usize {
        self.state.lock().unwrap().buf.len()
    }

    /// Absorbs `data` at `offset`, flushing through `sink` when the write
    /// cannot join the buffered region. `max_size` is the stream bound: a
    /// single write at or above it is flushed past the buffer entirely.
    pub fn append(
        &self,
        sink: &dyn WriteSink,
        inst: &OpenInstance,
        data: &[u8],
        offset: u64,
        max_size: usize,
    ) -> Result<(), ErrorCode> {
        let mut state = self.state.lock().unwrap();
        loop {
            if data.len() >= max_size {
                Self::flush_locked(&mut state, sink, inst)?;
                return sink.write_at(inst, data, offset);
            }
            if state.buf.is_empty() {
                state.begin = offset;
                state.buf.extend_from_slice(data);
                return Ok(());
            }
            let end = state.begin + state.buf.len() as u64;
            let new_end = end.max(offset + data.len() as u64);
            let joins = offset >= state.begin && offset <= end;
            if joins && (new_end - state.begin) as usize <= max_size {
                let rel = (offset - state.begin) as usize;
                let overlap = data.len().min(state.buf.len() - rel);
                state.buf[rel..rel + overlap].copy_from_slice(&data[..overlap]);
                state.buf.extend_from_slice(&data[overlap..]);
                return Ok(());
            }
            // Gap or overflow: flush and retry against an empty buffer.
            Self::flush_locked(&mut state, sink, inst)?;
        }
    }

    /// Synchronously writes buffered bytes to the backing store and clears.
    pub fn flush(&self, sink: &dyn WriteSink, inst: &OpenInstance) -> Result<(), ErrorCode> {
        let mut state = self.state.lock().unwrap();
        Self::flush_locked(&mut state, sink, inst)
    }

    fn flush_locked(
        state: &mut WriteBuf,
        sink: &dyn WriteSink,
        inst: &OpenInstance,
    ) -> Result<(), ErrorCode> {
        if state.buf.is_empty() {
            return Ok(());
        }
        sink.write_at(inst, &state.buf, state.begin)?;
        state.buf.clear();
        Ok(())
    }
}
