//! Framed-TCP data RPC between store nodes.
//!
//! One fixed-size little-endian request header names the operation, the
//! `(inode, node)` routing tuple, two operation-dependent arguments, and a
//! payload length; the reply carries an error code and a payload. The
//! server serves blocks straight from its local cache tree and refuses
//! requests routed at a different node id.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use binrw::io::Cursor;
use binrw::{binrw, BinRead, BinWrite};
use cuckoo_types::ErrorCode;

use crate::cache;
use crate::node::DataRpc;

const OP_READ_BLOCK: u8 = 1;
const OP_READ_SMALL: u8 = 2;
const OP_WRITE_AT: u8 = 3;
const OP_TRUNCATE: u8 = 4;
const OP_CLOSE_COMMIT: u8 = 5;

#[binrw]
#[brw(little, magic = b"CKIO")]
struct RequestHeader {
    op: u8,
    inode_id: u64,
    node_id: i32,
    /// Block index, offset, or size depending on `op`.
    arg0: u64,
    /// Block size or mtime depending on `op`.
    arg1: i64,
    len: u32,
}

const REQUEST_HEADER_LEN: usize = 4 + 1 + 8 + 4 + 8 + 8 + 4;

#[binrw]
#[brw(little, magic = b"CKIR")]
struct ReplyHeader {
    error_code: i32,
    len: u32,
}

const REPLY_HEADER_LEN: usize = 4 + 4 + 4;

fn encode_header<T>(header: &T) -> std::io::Result<Vec<u8>>
where
    T: for<'a> BinWrite<Args<'a> = ()> + binrw::meta::WriteEndian,
{
    let mut cursor = Cursor::new(Vec::new());
    header
        .write(&mut cursor)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(cursor.into_inner())
}

fn read_exact_buf(stream: &mut TcpStream, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Data RPC client for one peer endpoint. The stream connects lazily and
/// is dropped on any channel error so the next call reconnects.
pub struct RemoteIoClient {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl RemoteIoClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
        }
    }

    fn call(&self, header: RequestHeader, payload: &[u8]) -> Result<Vec<u8>, ErrorCode> {
        let mut guard = self.stream.lock().unwrap();
        if guard.is_none() {
            *guard = Some(TcpStream::connect(&self.addr).map_err(|err| {
                log::warn!("connect to {} failed: {err}", self.addr);
                ErrorCode::from(err)
            })?);
        }
        let stream = guard.as_mut().unwrap();
        match Self::call_inner(stream, header, payload) {
            Ok((code, reply)) => {
                if code == ErrorCode::Success {
                    Ok(reply)
                } else {
                    Err(code)
                }
            }
            Err(err) => {
                log::warn!("data channel to {} broke: {err}", self.addr);
                *guard = None;
                Err(ErrorCode::from(err))
            }
        }
    }

    fn call_inner(
        stream: &mut TcpStream,
        header: RequestHeader,
        payload: &[u8],
    ) -> std::io::Result<(ErrorCode, Vec<u8>)> {
        let header_bytes = encode_header(&header)?;
        stream.write_all(&header_bytes)?;
        stream.write_all(payload)?;
        stream.flush()?;

        let reply_bytes = read_exact_buf(stream, REPLY_HEADER_LEN)?;
        let reply = ReplyHeader::read(&mut Cursor::new(&reply_bytes))
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let body = read_exact_buf(stream, reply.len as usize)?;
        Ok((ErrorCode::from_wire(reply.error_code), body))
    }

    fn request(op: u8, inode_id: u64, node_id: i32, arg0: u64, arg1: i64, len: u32) -> RequestHeader {
        RequestHeader {
            op,
            inode_id,
            node_id,
            arg0,
            arg1,
            len,
        }
    }
}

impl DataRpc for RemoteIoClient {
    fn read_block(
        &self,
        inode_id: u64,
        node_id: i32,
        block_index: u64,
        block_size: u32,
    ) -> Result<Vec<u8>, ErrorCode> {
        self.call(
            Self::request(
                OP_READ_BLOCK,
                inode_id,
                node_id,
                block_index,
                i64::from(block_size),
                0,
            ),
            &[],
        )
    }

    fn read_small_file(&self, inode_id: u64, node_id: i32) -> Result<Vec<u8>, ErrorCode> {
        self.call(Self::request(OP_READ_SMALL, inode_id, node_id, 0, 0, 0), &[])
    }

    fn write_at(
        &self,
        inode_id: u64,
        node_id: i32,
        data: &[u8],
        offset: u64,
    ) -> Result<usize, ErrorCode> {
        self.call(
            Self::request(
                OP_WRITE_AT,
                inode_id,
                node_id,
                offset,
                0,
                data.len() as u32,
            ),
            data,
        )?;
        Ok(data.len())
    }

    fn truncate(&self, inode_id: u64, node_id: i32, size: u64) -> Result<(), ErrorCode> {
        self.call(Self::request(OP_TRUNCATE, inode_id, node_id, size, 0, 0), &[])?;
        Ok(())
    }

    fn close_commit(
        &self,
        inode_id: u64,
        node_id: i32,
        size: u64,
        mtime: i64,
    ) -> Result<(), ErrorCode> {
        self.call(
            Self::request(OP_CLOSE_COMMIT, inode_id, node_id, size, mtime, 0),
            &[],
        )?;
        Ok(())
    }
}

/// The data RPC server of one store node, serving its local cache tree.
pub struct RemoteIoServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

struct ServerState {
    node_id: i32,
    cache_root: PathBuf,
    total_directory: u32,
}

impl RemoteIoServer {
    /// Binds `addr` and serves the cache tree under `cache_root` for node
    /// `node_id`, one thread per accepted channel.
    pub fn spawn(
        addr: &str,
        node_id: i32,
        cache_root: PathBuf,
        total_directory: u32,
    ) -> std::io::Result<Self> {
        cache::prepare_buckets(&cache_root, total_directory)?;
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(ServerState {
            node_id,
            cache_root,
            total_directory,
        });
        let accept_stop = stop.clone();
        let accept_thread = std::thread::Builder::new()
            .name("cuckoo-remote-io".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if accept_stop.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let state = state.clone();
                            std::thread::spawn(move || serve_channel(stream, state));
                        }
                        Err(err) => log::warn!("accept failed: {err}"),
                    }
                }
            })?;
        log::info!("data RPC for node {node_id} listening on {local_addr}");
        Ok(Self {
            local_addr,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = TcpStream::connect(self.local_addr);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RemoteIoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_channel(mut stream: TcpStream, state: Arc<ServerState>) {
    loop {
        let header_bytes = match read_exact_buf(&mut stream, REQUEST_HEADER_LEN) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        let header = match RequestHeader::read(&mut Cursor::new(&header_bytes)) {
            Ok(header) => header,
            Err(err) => {
                log::warn!("bad data request frame: {err}");
                return;
            }
        };
        let payload = match read_exact_buf(&mut stream, header.len as usize) {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let (code, body) = process(&state, &header, &payload);
        let reply = match encode_header(&ReplyHeader {
            error_code: code.to_wire(),
            len: body.len() as u32,
        }) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("reply header encode failed: {err}");
                return;
            }
        };
        if stream.write_all(&reply).is_err() || stream.write_all(&body).is_err() {
            return;
        }
        if stream.flush().is_err() {
            return;
        }
    }
}

fn process(state: &ServerState, header: &RequestHeader, payload: &[u8]) -> (ErrorCode, Vec<u8>) {
    if header.node_id != state.node_id {
        log::warn!(
            "refusing request for node {} (local node is {})",
            header.node_id,
            state.node_id
        );
        return (ErrorCode::ProgramError, Vec::new());
    }
    let path = cache::file_path(&state.cache_root, state.total_directory, header.inode_id);
    let result = match header.op {
        OP_READ_BLOCK => read_block(&path, header.arg0, header.arg1 as u32),
        OP_READ_SMALL => std::fs::read(&path).map_err(ErrorCode::from),
        OP_WRITE_AT => write_at(&path, payload, header.arg0).map(|_| Vec::new()),
        OP_TRUNCATE => truncate(&path, header.arg0).map(|_| Vec::new()),
        OP_CLOSE_COMMIT => {
            log::debug!(
                "close-commit inode {} size {} mtime {}",
                header.inode_id,
                header.arg0,
                header.arg1
            );
            Ok(Vec::new())
        }
        other => {
            log::warn!("unknown data op {other}");
            Err(ErrorCode::ProgramError)
        }
    };
    match result {
        Ok(body) => (ErrorCode::Success, body),
        Err(code) => (code, Vec::new()),
    }
}

fn read_block(path: &PathBuf, block_index: u64, block_size: u32) -> Result<Vec<u8>, ErrorCode> {
    use std::os::unix::fs::FileExt;
    let file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; block_size as usize];
    let offset = block_index * u64::from(block_size);
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

fn write_at(path: &PathBuf, data: &[u8], offset: u64) -> Result<(), ErrorCode> {
    use std::os::unix::fs::FileExt;
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)?;
    file.write_all_at(data, offset)?;
    Ok(())
}

fn truncate(path: &PathBuf, size: u64) -> Result<(), ErrorCode> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(size)?;
    Ok(())
}
