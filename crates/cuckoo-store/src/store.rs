//! The store engine: locality routing, stream lifecycle, cache population.
//!
//! Reads and writes against an [`OpenInstance`] are routed by
//! `(inode, node)` locality. Local payloads live in the bucketed cache
//! tree; remote ones are reached over the peer's data RPC; blocks missing
//! from both fall through to the cold object backend and populate the
//! local cache on the way.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use cuckoo_types::{CuckooConfig, ErrorCode};
use metrics::counter;

use crate::cache;
use crate::metrics::{
    OBJECT_FETCHES, READS_FAILED, READS_SUCCESS, TOTAL_BYTES_READ, TOTAL_BYTES_WRITTEN,
    WRITES_FAILED, WRITES_SUCCESS,
};
use crate::node::StoreNode;
use crate::open_instance::OpenInstance;
use crate::pipe::BlockFetcher;
use crate::read_stream::ReadStream;
use crate::write_stream::WriteSink;

/// The cold tier behind local cache and peers. Implementing a real client
/// is out of scope here; deployments inject one, tests use a directory-
/// backed double when `TEST_OBS` is set.
pub trait ObjectBackend: Send + Sync {
    fn fetch_block(
        &self,
        inode_id: u64,
        block_index: u64,
        block_size: u32,
    ) -> Result<Vec<u8>, ErrorCode>;

    fn fetch_object(&self, inode_id: u64) -> Result<Vec<u8>, ErrorCode>;
}

/// Metadata close hook: publishes the final size and mtime of a closed
/// file to the metadata plane.
pub trait CloseCommit: Send + Sync {
    fn close_commit(
        &self,
        path: &str,
        size: u64,
        mtime: i64,
        node_id: i32,
    ) -> Result<(), ErrorCode>;
}

pub struct CuckooStore {
    cache_root: PathBuf,
    total_directory: u32,
    block_size: usize,
    big_file_read_size: usize,
    stream_max_size: usize,
    node: Arc<StoreNode>,
    object: Option<Arc<dyn ObjectBackend>>,
    committer: Option<Arc<dyn CloseCommit>>,
    /// Self-handle for spawning pusher threads; valid for the engine's
    /// whole lifetime by construction.
    weak_self: Weak<CuckooStore>,
}

impl CuckooStore {
    /// Builds the engine and pre-creates every cache bucket.
    pub fn new(config: &CuckooConfig, node: Arc<StoreNode>) -> Result<Arc<Self>, ErrorCode> {
        Self::with_backends(config, node, None, None)
    }

    /// [`CuckooStore::new`] with the cold object tier and the metadata
    /// close hook wired in.
    pub fn with_backends(
        config: &CuckooConfig,
        node: Arc<StoreNode>,
        object: Option<Arc<dyn ObjectBackend>>,
        committer: Option<Arc<dyn CloseCommit>>,
    ) -> Result<Arc<Self>, ErrorCode> {
        let cache_root = PathBuf::from(&config.cache_root);
        cache::prepare_buckets(&cache_root, config.total_directory).map_err(|err| {
            log::error!("cannot prepare cache buckets under {cache_root:?}: {err}");
            ErrorCode::from(err)
        })?;
        Ok(Arc::new_cyclic(|weak_self| Self {
            cache_root,
            total_directory: config.total_directory,
            block_size: config.block_size as usize,
            big_file_read_size: config.big_file_read_size as usize,
            stream_max_size: config.stream_max_size as usize,
            node,
            object,
            committer,
            weak_self: weak_self.clone(),
        }))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stream_max_size(&self) -> usize {
        self.stream_max_size
    }

    pub fn node(&self) -> &Arc<StoreNode> {
        &self.node
    }

    fn local_path(&self, inode_id: u64) -> PathBuf {
        cache::file_path(&self.cache_root, self.total_directory, inode_id)
    }

    /// Prepares the handle for I/O. Creating local files happens here so
    /// the data path never races on `O_CREAT`.
    pub fn open_file(&self, inst: &OpenInstance) -> Result<(), ErrorCode> {
        if !self.node.is_local(inst.node_id) {
            return Ok(());
        }
        let path = self.local_path(inst.inode_id);
        if (inst.oflags & libc::O_CREAT) != 0 {
            OpenOptions::new()
                .write(true)
                .create(true)
                .open(&path)
                .map_err(ErrorCode::from)?;
        }
        match std::fs::File::open(&path) {
            Ok(file) => {
                *inst.local_file.lock().unwrap() = Some(file);
                Ok(())
            }
            // Write-only handles may point at a file created by a peer
            // later; the data path reopens on demand.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ErrorCode::from(err)),
        }
    }

    /// Populates the whole-file read buffer of a small file, from the
    /// local cache, the owning peer, or the cold tier.
    pub fn read_small_files(&self, inst: &OpenInstance) -> Result<(), ErrorCode> {
        let bytes = if self.node.is_local(inst.node_id) {
            match std::fs::read(self.local_path(inst.inode_id)) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.fetch_whole_object(inst)?
                }
                Err(err) => return Err(ErrorCode::from(err)),
            }
        } else {
            match self
                .node
                .peer(inst.node_id)?
                .read_small_file(inst.inode_id, inst.node_id)
            {
                Ok(bytes) => bytes,
                Err(ErrorCode::NotFound) => self.fetch_whole_object(inst)?,
                Err(code) => return Err(code),
            }
        };
        *inst.read_buffer.lock().unwrap() = Some(Arc::new(bytes));
        Ok(())
    }

    fn fetch_whole_object(&self, inst: &OpenInstance) -> Result<Vec<u8>, ErrorCode> {
        let Some(object) = &self.object else {
            return Err(ErrorCode::NotFound);
        };
        counter!(OBJECT_FETCHES).increment(1);
        let bytes = object.fetch_object(inst.inode_id)?;
        // Populate the local cache on the way through.
        if let Err(err) = std::fs::write(self.local_path(inst.inode_id), &bytes) {
            log::warn!(
                "cannot cache object {} locally: {err}",
                inst.inode_id
            );
        }
        Ok(bytes)
    }

    /// Reads up to `out.len()` bytes at `offset`. Returns the bytes
    /// delivered; short counts mean end of file.
    pub fn read_file(
        &self,
        inst: &Arc<OpenInstance>,
        out: &mut [u8],
        offset: u64,
    ) -> Result<usize, ErrorCode> {
        if out.is_empty() {
            return Ok(0);
        }
        let current = inst.current_size.load(Ordering::Acquire);
        if offset >= current {
            return Ok(0);
        }
        let want = out.len().min((current - offset) as usize);

        // Small-file fast path: memcpy out of the whole-file buffer.
        let buffered = inst.read_buffer.lock().unwrap().clone();
        if let Some(buffer) = buffered {
            let available = buffer.len().saturating_sub(offset as usize);
            let n = want.min(available);
            out[..n].copy_from_slice(&buffer[offset as usize..offset as usize + n]);
            counter!(TOTAL_BYTES_READ).increment(n as u64);
            counter!(READS_SUCCESS).increment(1);
            return Ok(n);
        }

        let result = self.read_large(inst, &mut out[..want], offset);
        match &result {
            Ok(n) => {
                counter!(TOTAL_BYTES_READ).increment(*n as u64);
                counter!(READS_SUCCESS).increment(1);
            }
            Err(_) => {
                counter!(READS_FAILED).increment(1);
            }
        }
        result
    }

    /// Large-file path: a prefetching stream for the sequential case, with
    /// skip-forward against the stream and a direct read for rewinds.
    fn read_large(
        &self,
        inst: &Arc<OpenInstance>,
        out: &mut [u8],
        offset: u64,
    ) -> Result<usize, ErrorCode> {
        let mut state = inst.read_state.lock().unwrap();
        if state.stream.is_none() {
            let current = inst.current_size.load(Ordering::Acquire);
            let file_blocks = current.div_ceil(self.block_size as u64);
            let pipe_num = (self.big_file_read_size / self.block_size).max(1);
            let stream = Arc::new(ReadStream::new(file_blocks, self.block_size, pipe_num));
            let fetcher: Arc<dyn BlockFetcher> =
                self.weak_self.upgrade().ok_or(ErrorCode::ProgramError)?;
            stream.start_push_threaded(fetcher, Arc::downgrade(inst));
            state.stream = Some(stream);
            state.pos = 0;
        }
        let stream = state.stream.clone().unwrap();

        if offset == state.pos {
            let n = stream.wait_pop(out)?;
            state.pos += n as u64;
            return Ok(n);
        }
        if offset > state.pos {
            // Skip the gap through the stream, then serve in place.
            let mut skip = offset - state.pos;
            let mut scratch = vec![0u8; self.block_size.min(skip as usize)];
            while skip > 0 {
                let chunk = scratch.len().min(skip as usize);
                let n = stream.wait_pop(&mut scratch[..chunk])?;
                if n == 0 {
                    return Ok(0);
                }
                state.pos += n as u64;
                skip -= n as u64;
            }
            let n = stream.wait_pop(out)?;
            state.pos += n as u64;
            return Ok(n);
        }
        // Behind the stream: the data is already gone from the ring, so
        // bypass it without disturbing the cursor.
        drop(state);
        self.direct_read(inst, out, offset)
    }

    /// Block-granular read that bypasses the stream.
    fn direct_read(
        &self,
        inst: &OpenInstance,
        out: &mut [u8],
        offset: u64,
    ) -> Result<usize, ErrorCode> {
        let mut copied = 0;
        while copied < out.len() {
            let pos = offset + copied as u64;
            let block_index = pos / self.block_size as u64;
            let in_block = (pos % self.block_size as u64) as usize;
            let mut block = vec![0u8; self.block_size];
            let n = self.fetch_block(inst, block_index, &mut block)?;
            if n <= in_block {
                break;
            }
            let take = (n - in_block).min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&block[in_block..in_block + take]);
            copied += take;
            if n < self.block_size {
                break;
            }
        }
        Ok(copied)
    }

    /// Positional local read, through the handle's cached file when open.
    fn read_local_at(
        &self,
        inst: &OpenInstance,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        let guard = inst.local_file.lock().unwrap();
        let opened;
        let file = match guard.as_ref() {
            Some(file) => file,
            None => {
                opened = std::fs::File::open(self.local_path(inst.inode_id))?;
                &opened
            }
        };
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn fetch_block_object(
        &self,
        inst: &OpenInstance,
        block_index: u64,
        buf: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        let Some(object) = &self.object else {
            return Err(ErrorCode::NotFound);
        };
        counter!(OBJECT_FETCHES).increment(1);
        let block = object.fetch_block(inst.inode_id, block_index, self.block_size as u32)?;
        // Populate the local cache on the way through.
        if let Err(code) = self.write_local(
            inst.inode_id,
            &block,
            block_index * self.block_size as u64,
        ) {
            log::warn!(
                "cannot cache block {block_index} of inode {} locally: {code}",
                inst.inode_id
            );
        }
        let n = block.len().min(buf.len());
        buf[..n].copy_from_slice(&block[..n]);
        Ok(n)
    }

    fn write_local(&self, inode_id: u64, data: &[u8], offset: u64) -> Result<(), ErrorCode> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(self.local_path(inode_id))?;
        file.write_all_at(data, offset)?;
        Ok(())
    }

    /// Writes `data` at `offset`, write-through or write-back by size.
    ///
    /// A write at or above the stream bound commits directly to the
    /// backing store (after flushing anything buffered); smaller writes
    /// coalesce in the handle's write stream. Either way `current_size`
    /// advances to cover the write's tail.
    pub fn write_file(
        &self,
        inst: &OpenInstance,
        data: &[u8],
        offset: u64,
    ) -> Result<(), ErrorCode> {
        let result = if data.len() >= self.stream_max_size {
            inst.write_stream
                .flush(self, inst)
                .and_then(|()| self.write_at(inst, data, offset))
        } else {
            inst.write_stream
                .append(self, inst, data, offset, self.stream_max_size)
        };
        match result {
            Ok(()) => {
                inst.current_size
                    .fetch_max(offset + data.len() as u64, Ordering::AcqRel);
                counter!(TOTAL_BYTES_WRITTEN).increment(data.len() as u64);
                counter!(WRITES_SUCCESS).increment(1);
                Ok(())
            }
            Err(code) => {
                counter!(WRITES_FAILED).increment(1);
                Err(code)
            }
        }
    }

    /// Flushes buffered writes, shuts the prefetch stream down, and
    /// publishes the final size and mtime to the metadata plane.
    pub fn close_file(&self, inst: &OpenInstance) -> Result<(), ErrorCode> {
        inst.write_stream.flush(self, inst)?;
        let stream = inst.read_state.lock().unwrap().stream.take();
        if let Some(stream) = stream {
            stream.close();
        }
        *inst.local_file.lock().unwrap() = None;

        let size = inst.current_size.load(Ordering::Acquire);
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        if !self.node.is_local(inst.node_id) {
            self.node
                .peer(inst.node_id)?
                .close_commit(inst.inode_id, inst.node_id, size, mtime)?;
        }
        if let Some(committer) = &self.committer {
            committer.close_commit(&inst.path, size, mtime, inst.node_id)?;
        }
        Ok(())
    }

    /// Drops the local cache copy of an unlinked inode.
    pub fn remove_local(&self, inode_id: u64) -> Result<(), ErrorCode> {
        match std::fs::remove_file(self.local_path(inode_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ErrorCode::from(err)),
        }
    }
}

impl BlockFetcher for CuckooStore {
    fn fetch_block(
        &self,
        inst: &OpenInstance,
        block_index: u64,
        buf: &mut [u8],
    ) -> Result<usize, ErrorCode> {
        let offset = block_index * self.block_size as u64;
        let current = inst.current_size.load(Ordering::Acquire);
        if offset >= current {
            return Ok(0);
        }
        let want = buf.len().min((current - offset) as usize);
        if self.node.is_local(inst.node_id) {
            match self.read_local_at(inst, offset, &mut buf[..want]) {
                Ok(n) => Ok(n),
                Err(ErrorCode::NotFound) => self.fetch_block_object(inst, block_index, buf),
                Err(code) => Err(code),
            }
        } else {
            let fetched = self.node.peer(inst.node_id)?.read_block(
                inst.inode_id,
                inst.node_id,
                block_index,
                self.block_size as u32,
            );
            match fetched {
                Ok(block) => {
                    let n = block.len().min(want);
                    buf[..n].copy_from_slice(&block[..n]);
                    Ok(n)
                }
                Err(ErrorCode::NotFound) => self.fetch_block_object(inst, block_index, buf),
                Err(code) => Err(code),
            }
        }
    }
}

impl WriteSink for CuckooStore {
    fn write_at(
        &self,
        inst: &OpenInstance,
        data: &[u8],
        offset: u64,
    ) -> Result<(), ErrorCode> {
        if self.node.is_local(inst.node_id) {
            self.write_local(inst.inode_id, data, offset)
        } else {
            self.node
                .peer(inst.node_id)?
                .write_at(inst.inode_id, inst.node_id, data, offset)?;
            Ok(())
        }
    }
}
