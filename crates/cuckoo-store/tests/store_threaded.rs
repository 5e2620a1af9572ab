//! Threaded store-engine scenarios: write-through vs write-back, small and
//! large reads, local and remote routing.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use cuckoo_store::{CuckooStore, OpenInstance, RemoteIoClient, RemoteIoServer, StoreNode};
use cuckoo_types::CuckooConfig;

const BLOCK_SIZE: u32 = 64 * 1024;
const BIG_FILE_READ_SIZE: u32 = 256 * 1024;
const STREAM_MAX: usize = 128 * 1024;

const LOCAL_NODE: i32 = 1;
const REMOTE_NODE: i32 = 0;

struct Harness {
    // Held for their Drop side effects.
    _local_dir: tempfile::TempDir,
    _remote_dir: tempfile::TempDir,
    _remote_server: RemoteIoServer,
    store: Arc<CuckooStore>,
}

fn config_for(dir: &tempfile::TempDir, node_id: i32) -> CuckooConfig {
    CuckooConfig {
        cache_root: dir.path().to_str().unwrap().to_string(),
        node_id,
        block_size: BLOCK_SIZE,
        big_file_read_size: BIG_FILE_READ_SIZE,
        stream_max_size: STREAM_MAX as u32,
        total_directory: 16,
        ..Default::default()
    }
}

/// A local store plus one loopback "remote" peer served over real TCP.
fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let local_dir = tempfile::tempdir().unwrap();
    let remote_dir = tempfile::tempdir().unwrap();

    let remote_server = RemoteIoServer::spawn(
        "127.0.0.1:0",
        REMOTE_NODE,
        remote_dir.path().to_path_buf(),
        16,
    )
    .unwrap();

    let node = Arc::new(StoreNode::new(LOCAL_NODE, Vec::new()));
    node.register_peer(
        REMOTE_NODE,
        Arc::new(RemoteIoClient::new(remote_server.local_addr().to_string())),
    );

    let config = config_for(&local_dir, LOCAL_NODE);
    let store = CuckooStore::new(&config, node).unwrap();
    Harness {
        _local_dir: local_dir,
        _remote_dir: remote_dir,
        _remote_server: remote_server,
        store,
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn new_instance(inode_id: u64, node_id: i32, path: &str, oflags: i32) -> Arc<OpenInstance> {
    Arc::new(OpenInstance::new(inode_id, node_id, path, oflags))
}

fn reading_instance(inode_id: u64, node_id: i32, path: &str, size: u64) -> Arc<OpenInstance> {
    let mut inst = OpenInstance::new(inode_id, node_id, path, libc::O_RDONLY);
    inst.original_size = size;
    inst.current_size = size.into();
    Arc::new(inst)
}

/* ------------------------------- write local ------------------------------- */

#[test]
fn write_through_local_same_offset() {
    let h = harness();
    let inst = new_instance(1000, LOCAL_NODE, "/WriteLocal", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&inst).unwrap();

    let size = STREAM_MAX + 1;
    let buf = Arc::new(pattern(size));

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = h.store.clone();
            let inst = inst.clone();
            let buf = buf.clone();
            std::thread::spawn(move || store.write_file(&inst, &buf, 0))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    assert_eq!(inst.write_stream.size(), 0);
    assert_eq!(inst.current_size.load(Ordering::Acquire), size as u64);
}

#[test]
fn write_through_local_different_offsets() {
    let h = harness();
    let inst = new_instance(1001, LOCAL_NODE, "/WriteLocal", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&inst).unwrap();

    let size = STREAM_MAX + 1;
    inst.current_size.store(size as u64, Ordering::Release);
    let buf = Arc::new(pattern(size));

    let writers: Vec<_> = [0u64, size as u64]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            let buf = buf.clone();
            std::thread::spawn(move || store.write_file(&inst, &buf, offset))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    assert_eq!(inst.write_stream.size(), 0);
    assert_eq!(inst.current_size.load(Ordering::Acquire), 2 * size as u64);
}

/* ------------------------------- write remote ------------------------------ */

#[test]
fn write_through_remote_same_offset() {
    let h = harness();
    let inst = new_instance(2000, REMOTE_NODE, "/WriteRemote", libc::O_WRONLY | libc::O_CREAT);

    let size = STREAM_MAX + 1;
    let buf = Arc::new(pattern(size));

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = h.store.clone();
            let inst = inst.clone();
            let buf = buf.clone();
            std::thread::spawn(move || store.write_file(&inst, &buf, 0))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    assert_eq!(inst.write_stream.size(), 0);
    assert_eq!(inst.current_size.load(Ordering::Acquire), size as u64);
}

#[test]
fn write_through_remote_different_offsets() {
    let h = harness();
    let inst = new_instance(2001, REMOTE_NODE, "/WriteRemote", libc::O_WRONLY | libc::O_CREAT);

    let size = STREAM_MAX + 1;
    let buf = Arc::new(pattern(size));

    let writers: Vec<_> = [0u64, size as u64]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            let buf = buf.clone();
            std::thread::spawn(move || store.write_file(&inst, &buf, offset))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    assert_eq!(inst.write_stream.size(), 0);
    assert_eq!(inst.current_size.load(Ordering::Acquire), 2 * size as u64);
}

#[test]
fn write_back_remote_same_offset() {
    let h = harness();
    let inst = new_instance(2002, REMOTE_NODE, "/WriteRemote", libc::O_WRONLY);

    let size = STREAM_MAX / 2;
    let buf = Arc::new(pattern(size));

    let writers: Vec<_> = (0..2)
        .map(|_| {
            let store = h.store.clone();
            let inst = inst.clone();
            let buf = buf.clone();
            std::thread::spawn(move || store.write_file(&inst, &buf, 0))
        })
        .collect();
    for writer in writers {
        writer.join().unwrap().unwrap();
    }

    // Both writes were absorbed into the same buffered region.
    assert_eq!(inst.write_stream.size(), size);
    assert_eq!(inst.current_size.load(Ordering::Acquire), size as u64);
}

/* -------------------------------- read local ------------------------------- */

#[test]
fn read_local_small_same_offset() {
    let h = harness();
    let size = STREAM_MAX * 2;
    let data = pattern(size);

    let writer = new_instance(10000, LOCAL_NODE, "/ReadLocalSmall", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&writer).unwrap();
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(10000, LOCAL_NODE, "/ReadLocalSmall", size as u64);
    h.store.read_small_files(&inst).unwrap();

    let read_size = size / 2;
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, 0).unwrap();
                (n, out)
            })
        })
        .collect();
    for reader in readers {
        let (n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[..read_size]);
    }
}

#[test]
fn read_local_small_different_offsets() {
    let h = harness();
    let size = STREAM_MAX * 2;
    let data = pattern(size);

    let writer = new_instance(10002, LOCAL_NODE, "/ReadLocalSmall2", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&writer).unwrap();
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(10002, LOCAL_NODE, "/ReadLocalSmall2", size as u64);
    h.store.read_small_files(&inst).unwrap();

    let read_size = size / 2;
    let readers: Vec<_> = [0usize, read_size]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, offset as u64).unwrap();
                (offset, n, out)
            })
        })
        .collect();
    for reader in readers {
        let (offset, n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[offset..offset + read_size]);
    }
}

#[test]
fn read_local_large_same_offset() {
    let h = harness();
    let size = BIG_FILE_READ_SIZE as usize;
    let data = pattern(size);

    let writer = new_instance(10001, LOCAL_NODE, "/ReadLocalLarge", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&writer).unwrap();
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(10001, LOCAL_NODE, "/ReadLocalLarge", size as u64);

    let read_size = BLOCK_SIZE as usize;
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, 0).unwrap();
                (n, out)
            })
        })
        .collect();
    for reader in readers {
        let (n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[..read_size]);
    }
    h.store.close_file(&inst).unwrap();
}

#[test]
fn read_local_large_different_offsets() {
    let h = harness();
    let size = BIG_FILE_READ_SIZE as usize;
    let data = pattern(size);

    let writer = new_instance(10003, LOCAL_NODE, "/ReadLocalLarge2", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&writer).unwrap();
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(10003, LOCAL_NODE, "/ReadLocalLarge2", size as u64);

    let read_size = BLOCK_SIZE as usize;
    let readers: Vec<_> = [0usize, read_size]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, offset as u64).unwrap();
                (offset, n, out)
            })
        })
        .collect();
    for reader in readers {
        let (offset, n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[offset..offset + read_size]);
    }
    h.store.close_file(&inst).unwrap();
}

/* -------------------------------- read remote ------------------------------ */

#[test]
fn read_remote_small_different_offsets() {
    let h = harness();
    let size = STREAM_MAX * 2;
    let data = pattern(size);

    let writer = new_instance(20000, REMOTE_NODE, "/ReadRemoteSmall", libc::O_WRONLY | libc::O_CREAT);
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(20000, REMOTE_NODE, "/ReadRemoteSmall", size as u64);
    h.store.read_small_files(&inst).unwrap();

    let read_size = size / 2;
    let readers: Vec<_> = [0usize, read_size]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, offset as u64).unwrap();
                (offset, n, out)
            })
        })
        .collect();
    for reader in readers {
        let (offset, n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[offset..offset + read_size]);
    }
}

#[test]
fn read_remote_large_different_offsets() {
    let h = harness();
    let size = BIG_FILE_READ_SIZE as usize;
    let data = pattern(size);

    let writer = new_instance(20001, REMOTE_NODE, "/ReadRemoteLarge", libc::O_WRONLY | libc::O_CREAT);
    h.store.write_file(&writer, &data, 0).unwrap();

    let inst = reading_instance(20001, REMOTE_NODE, "/ReadRemoteLarge", size as u64);

    let read_size = BLOCK_SIZE as usize;
    let readers: Vec<_> = [0usize, read_size]
        .into_iter()
        .map(|offset| {
            let store = h.store.clone();
            let inst = inst.clone();
            std::thread::spawn(move || {
                let mut out = vec![0u8; read_size];
                let n = store.read_file(&inst, &mut out, offset as u64).unwrap();
                (offset, n, out)
            })
        })
        .collect();
    for reader in readers {
        let (offset, n, out) = reader.join().unwrap();
        assert_eq!(n, read_size);
        assert_eq!(out, data[offset..offset + read_size]);
    }
    h.store.close_file(&inst).unwrap();
}

/* ------------------------------ misc lifecycle ----------------------------- */

#[test]
fn close_flushes_buffered_writes() {
    let h = harness();
    let inode = 3000;
    let inst = new_instance(inode, LOCAL_NODE, "/CloseFlush", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&inst).unwrap();

    let data = pattern(STREAM_MAX / 4);
    h.store.write_file(&inst, &data, 0).unwrap();
    assert_eq!(inst.write_stream.size(), data.len());
    h.store.close_file(&inst).unwrap();
    assert_eq!(inst.write_stream.size(), 0);

    let inst = reading_instance(inode, LOCAL_NODE, "/CloseFlush", data.len() as u64);
    h.store.read_small_files(&inst).unwrap();
    let mut out = vec![0u8; data.len()];
    let n = h.store.read_file(&inst, &mut out, 0).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(out, data);
}

#[test]
fn remove_local_is_idempotent() {
    let h = harness();
    let inst = new_instance(4000, LOCAL_NODE, "/Remove", libc::O_WRONLY | libc::O_CREAT);
    h.store.open_file(&inst).unwrap();
    h.store.write_file(&inst, &pattern(STREAM_MAX), 0).unwrap();
    h.store.remove_local(4000).unwrap();
    h.store.remove_local(4000).unwrap();
}
