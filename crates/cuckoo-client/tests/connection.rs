//! Connection round trips against an in-memory metadata service, over the
//! in-process transport and over a real TCP channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cuckoo_client::{
    Connection, LoopbackTransport, MetaService, TcpMetaServer, TcpMetaTransport,
};
use cuckoo_codec::{
    decode_params, encode_responses, DirEntry, MetaProcessInfo, MetaServiceKind,
    SerializedData,
};
use cuckoo_types::{ErrorCode, ServerIdentifier};

#[derive(Clone)]
struct FileRecord {
    inode_id: u64,
    mode: u32,
    uid: u32,
    gid: u32,
    size: i64,
    mtime: i64,
    is_dir: bool,
}

/// A toy namespace good enough to answer every service kind.
#[derive(Default)]
struct MemoryMetaService {
    files: Mutex<HashMap<String, FileRecord>>,
    next_inode: AtomicU64,
}

impl MemoryMetaService {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            next_inode: AtomicU64::new(100),
        }
    }

    fn alloc_inode(&self) -> u64 {
        self.next_inode.fetch_add(1, Ordering::Relaxed)
    }

    fn process_one(&self, kind: MetaServiceKind, info: &mut MetaProcessInfo) {
        use MetaServiceKind::*;
        let mut files = self.files.lock().unwrap();
        info.error_code = ErrorCode::Success;
        match kind {
            Mkdir => {
                if files.contains_key(&info.path) {
                    info.error_code = ErrorCode::FileExists;
                } else {
                    let record = FileRecord {
                        inode_id: self.alloc_inode(),
                        mode: 0o040755,
                        uid: 0,
                        gid: 0,
                        size: 0,
                        mtime: 0,
                        is_dir: true,
                    };
                    files.insert(info.path.clone(), record);
                }
            }
            Create => {
                let record = files.entry(info.path.clone()).or_insert_with(|| FileRecord {
                    inode_id: self.alloc_inode(),
                    mode: 0o100644,
                    uid: 0,
                    gid: 0,
                    size: 0,
                    mtime: 0,
                    is_dir: false,
                });
                info.inode_id = record.inode_id;
                info.node_id = 1;
                info.stat.st_ino = record.inode_id;
                info.stat.st_mode = record.mode;
            }
            Stat | Open | OpenDir => match files.get(&info.path) {
                Some(record) => {
                    info.inode_id = record.inode_id;
                    info.node_id = 1;
                    info.stat.st_ino = record.inode_id;
                    info.stat.st_mode = record.mode;
                    info.stat.st_uid = record.uid;
                    info.stat.st_gid = record.gid;
                    info.stat.st_size = record.size;
                    info.stat.st_mtim = record.mtime;
                }
                None => info.error_code = ErrorCode::NotFound,
            },
            Close => {
                if let Some(record) = files.get_mut(&info.path) {
                    record.size = info.stat.st_size;
                    record.mtime = info.stat.st_mtim;
                } else {
                    info.error_code = ErrorCode::NotFound;
                }
            }
            Unlink => match files.remove(&info.path) {
                Some(record) => {
                    info.inode_id = record.inode_id;
                    info.stat.st_size = record.size;
                    info.node_id = 1;
                }
                None => info.error_code = ErrorCode::NotFound,
            },
            Rmdir => match files.get(&info.path) {
                Some(record) if record.is_dir => {
                    files.remove(&info.path);
                }
                Some(_) => info.error_code = ErrorCode::ProgramError,
                None => info.error_code = ErrorCode::NotFound,
            },
            ReadDir => {
                let prefix = if info.path.ends_with('/') {
                    info.path.clone()
                } else {
                    format!("{}/", info.path)
                };
                let mut entries: Vec<DirEntry> = files
                    .iter()
                    .filter(|(path, _)| {
                        path.starts_with(&prefix) && !path[prefix.len()..].contains('/')
                    })
                    .map(|(path, record)| DirEntry {
                        file_name: path[prefix.len()..].to_string(),
                        mode: record.mode,
                    })
                    .collect();
                entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
                info.readdir_entries = entries;
                info.readdir_last_shard_index = 0;
            }
            Rename => match files.remove(&info.path) {
                Some(record) => {
                    files.insert(info.dst_path.clone(), record);
                }
                None => info.error_code = ErrorCode::NotFound,
            },
            UtimeNs => match files.get_mut(&info.path) {
                Some(record) => {
                    if info.stat.st_mtim >= 0 {
                        record.mtime = info.stat.st_mtim;
                    }
                }
                None => info.error_code = ErrorCode::NotFound,
            },
            Chown => match files.get_mut(&info.path) {
                Some(record) => {
                    record.uid = info.stat.st_uid;
                    record.gid = info.stat.st_gid;
                }
                None => info.error_code = ErrorCode::NotFound,
            },
            Chmod => match files.get_mut(&info.path) {
                Some(record) => record.mode = info.stat.st_mode,
                None => info.error_code = ErrorCode::NotFound,
            },
            PlainCommand => {
                info.plain_response = format!("ok: {}", info.path);
            }
            _ => info.error_code = ErrorCode::ProgramError,
        }
    }
}

impl MetaService for MemoryMetaService {
    fn process(&self, kind: MetaServiceKind, count: usize, param: &[u8]) -> (ErrorCode, Vec<u8>) {
        let mut infos = match decode_params(kind, count, param) {
            Ok(infos) => infos,
            Err(_) => return (ErrorCode::ProgramError, Vec::new()),
        };
        for info in infos.iter_mut() {
            self.process_one(kind, info);
        }
        let mut response = SerializedData::new();
        match encode_responses(kind, &infos, &mut response) {
            Ok(()) => (ErrorCode::Success, response.as_bytes().to_vec()),
            Err(_) => (ErrorCode::ProgramError, Vec::new()),
        }
    }
}

fn exercise(conn: &Connection) {
    conn.mkdir("/dir").unwrap();
    assert_eq!(conn.mkdir("/dir"), Err(ErrorCode::FileExists));

    let created = conn.create("/dir/file").unwrap();
    assert_eq!(created.code, ErrorCode::Success);
    assert!(created.inode_id >= 100);

    let stat = conn.stat("/dir/file").unwrap();
    assert_eq!(stat.inode_id, created.inode_id);
    assert_eq!(conn.stat("/missing"), Err(ErrorCode::NotFound));

    conn.close("/dir/file", 4096, 1_700_000_000, 1).unwrap();
    let opened = conn.open("/dir/file").unwrap();
    assert_eq!(opened.stat.st_size, 4096);

    conn.chmod("/dir/file", 0o100600).unwrap();
    conn.chown("/dir/file", 1000, 1000).unwrap();
    conn.utime_ns("/dir/file", -1, 1_800_000_000).unwrap();
    let stat = conn.stat("/dir/file").unwrap();
    assert_eq!(stat.stat.st_mode, 0o100600);
    assert_eq!(stat.stat.st_uid, 1000);
    assert_eq!(stat.stat.st_mtim, 1_800_000_000);

    conn.create("/dir/other").unwrap();
    let listing = conn.read_dir("/dir", -1, -1, "").unwrap();
    let names: Vec<_> = listing
        .entries
        .iter()
        .map(|e| e.file_name.as_str())
        .collect();
    assert_eq!(names, vec!["file", "other"]);

    let dir_inode = conn.open_dir("/dir").unwrap();
    assert!(dir_inode >= 100);

    conn.rename("/dir/other", "/dir/renamed").unwrap();
    assert_eq!(conn.stat("/dir/other"), Err(ErrorCode::NotFound));
    conn.stat("/dir/renamed").unwrap();

    let unlinked = conn.unlink("/dir/renamed").unwrap();
    assert!(unlinked.inode_id >= 100);
    assert_eq!(conn.unlink("/dir/renamed"), Err(ErrorCode::NotFound));

    let output = conn.plain_command("select 1").unwrap();
    assert_eq!(output, "ok: select 1");

    conn.unlink("/dir/file").unwrap();
    conn.rmdir("/dir").unwrap();
}

#[test]
fn full_surface_over_loopback() {
    let service = Arc::new(MemoryMetaService::new());
    let conn = Connection::new(
        ServerIdentifier::new("127.0.0.1", 0, 0),
        Box::new(LoopbackTransport(service)),
    );
    exercise(&conn);
}

#[test]
fn full_surface_over_tcp() {
    let service = Arc::new(MemoryMetaService::new());
    let server = TcpMetaServer::spawn("127.0.0.1:0", service).unwrap();
    let addr = server.local_addr();
    let conn = Connection::new(
        ServerIdentifier::new("127.0.0.1", addr.port(), 0),
        Box::new(TcpMetaTransport::new(addr.to_string())),
    );
    exercise(&conn);
}

#[test]
fn channel_errors_map_to_io_error() {
    // Nothing listens here.
    let conn = Connection::new(
        ServerIdentifier::new("127.0.0.1", 1, 0),
        Box::new(TcpMetaTransport::new("127.0.0.1:1")),
    );
    let err = conn.stat("/x").unwrap_err();
    assert!(matches!(err, ErrorCode::IoError | ErrorCode::PermissionDenied));
}
