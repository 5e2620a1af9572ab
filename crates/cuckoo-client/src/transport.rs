//! Transport seam of the metadata RPC channel.
//!
//! A request carries `(type, count, serialized_param)`, a reply carries
//! `(error_code, serialized_response)`; the blobs are opaque here. The TCP
//! transport frames both with a fixed little-endian header so the stream
//! stays byte-for-byte wire compatible within a deployment.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use binrw::io::Cursor;
use binrw::{binrw, BinRead, BinWrite};
use cuckoo_codec::MetaServiceKind;
use cuckoo_types::ErrorCode;

/// One metadata reply: the channel-level error code plus the response blob.
#[derive(Debug, Clone)]
pub struct MetaReply {
    pub error_code: ErrorCode,
    pub response: Vec<u8>,
}

/// The synchronous RPC stub a [`crate::Connection`] invokes.
pub trait MetaTransport: Send + Sync {
    /// Issues one request and blocks for the reply. Channel-level failures
    /// map to [`ErrorCode::IoError`].
    fn call(
        &self,
        kind: MetaServiceKind,
        count: u32,
        param: &[u8],
    ) -> Result<MetaReply, ErrorCode>;
}

/// Server-side counterpart: processes one request into `(code, blob)`.
pub trait MetaService: Send + Sync + 'static {
    fn process(&self, kind: MetaServiceKind, count: usize, param: &[u8]) -> (ErrorCode, Vec<u8>);
}

/// In-process transport for tests and co-located deployments.
pub struct LoopbackTransport(pub Arc<dyn MetaService>);

impl MetaTransport for LoopbackTransport {
    fn call(
        &self,
        kind: MetaServiceKind,
        count: u32,
        param: &[u8],
    ) -> Result<MetaReply, ErrorCode> {
        let (error_code, response) = self.0.process(kind, count as usize, param);
        Ok(MetaReply {
            error_code,
            response,
        })
    }
}

#[binrw]
#[brw(little, magic = b"CKMT")]
struct RequestHeader {
    kind: i32,
    count: u32,
    len: u32,
}

const REQUEST_HEADER_LEN: usize = 16;

#[binrw]
#[brw(little, magic = b"CKMR")]
struct ReplyHeader {
    error_code: i32,
    len: u32,
}

const REPLY_HEADER_LEN: usize = 12;

fn write_frame(
    stream: &mut TcpStream,
    header_bytes: &[u8],
    payload: &[u8],
) -> std::io::Result<()> {
    stream.write_all(header_bytes)?;
    stream.write_all(payload)?;
    stream.flush()
}

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

/// One framed TCP channel to one metadata endpoint.
///
/// The underlying stream is connected lazily and dropped on any channel
/// error, so the next call reconnects.
pub struct TcpMetaTransport {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpMetaTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
        }
    }

    fn call_inner(
        &self,
        stream: &mut TcpStream,
        kind: MetaServiceKind,
        count: u32,
        param: &[u8],
    ) -> std::io::Result<MetaReply> {
        let header = encode_header(&RequestHeader {
            kind: kind.to_wire(),
            count,
            len: param.len() as u32,
        })?;
        write_frame(stream, &header, param)?;
        let header_bytes = read_exact_buf(stream, REPLY_HEADER_LEN)?;
        let header = ReplyHeader::read(&mut Cursor::new(&header_bytes))
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let response = read_exact_buf(stream, header.len as usize)?;
        Ok(MetaReply {
            error_code: ErrorCode::from_wire(header.error_code),
            response,
        })
    }
}

impl MetaTransport for TcpMetaTransport {
    fn call(
        &self,
        kind: MetaServiceKind,
        count: u32,
        param: &[u8],
    ) -> Result<MetaReply, ErrorCode> {
        let mut guard = self.stream.lock().unwrap();
        if guard.is_none() {
            *guard = Some(TcpStream::connect(&self.addr).map_err(|err| {
                log::warn!("connect to {} failed: {err}", self.addr);
                ErrorCode::from(err)
            })?);
        }
        let stream = guard.as_mut().unwrap();
        match self.call_inner(stream, kind, count, param) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                log::warn!("channel to {} broke: {err}", self.addr);
                *guard = None;
                Err(ErrorCode::from(err))
            }
        }
    }
}

/// Minimal framed-TCP metadata server, one thread per accepted channel.
///
/// Production deployments put the real database-backed service behind this;
/// tests boot it on a loopback port.
pub struct TcpMetaServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TcpMetaServer {
    pub fn spawn(addr: &str, service: Arc<dyn MetaService>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = stop.clone();
        let accept_thread = std::thread::Builder::new()
            .name("cuckoo-meta-server".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if accept_stop.load(Ordering::Acquire) {
                        break;
                    }
                    match stream {
                        Ok(stream) => {
                            let service = service.clone();
                            std::thread::spawn(move || serve_channel(stream, service));
                        }
                        Err(err) => log::warn!("accept failed: {err}"),
                    }
                }
            })?;
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
        // Wake the accept loop.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TcpMetaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_channel(mut stream: TcpStream, service: Arc<dyn MetaService>) {
    loop {
        let header_bytes = match read_exact_buf(&mut stream, REQUEST_HEADER_LEN) {
            Ok(bytes) => bytes,
            // EOF: the peer closed its channel.
            Err(_) => return,
        };
        let header = match RequestHeader::read(&mut Cursor::new(&header_bytes)) {
            Ok(header) => header,
            Err(err) => {
                log::warn!("bad request frame: {err}");
                return;
            }
        };
        let param = match read_exact_buf(&mut stream, header.len as usize) {
            Ok(param) => param,
            Err(_) => return,
        };
        let (error_code, response) = match MetaServiceKind::from_wire(header.kind) {
            Some(kind) => service.process(kind, header.count as usize, &param),
            None => (ErrorCode::ProgramError, Vec::new()),
        };
        let reply = match encode_header(&ReplyHeader {
            error_code: error_code.to_wire(),
            len: response.len() as u32,
        }) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("reply header encode failed: {err}");
                return;
            }
        };
        if let Err(err) = write_frame(&mut stream, &reply, &response) {
            log::warn!("reply write failed: {err}");
            return;
        }
    }
}
