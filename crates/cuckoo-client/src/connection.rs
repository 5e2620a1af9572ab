//! One synchronous RPC channel to one metadata endpoint.
//!
//! Each user-facing operation builds its request record into a thread-local
//! scratch buffer (no per-call allocation on the hot path), invokes the
//! transport stub synchronously, and decodes the reply into caller-visible
//! values. The server-returned code is preserved exactly; in particular
//! `FILE_EXISTS` stays distinct from other failures because mkdir/create
//! treat it as success-like.

use std::cell::RefCell;

use cuckoo_codec::{
    decode_responses, encode_params, DirEntry, MetaProcessInfo, MetaServiceKind,
    SerializedData,
};
use cuckoo_types::{ErrorCode, FileStat, ServerIdentifier};

use crate::transport::MetaTransport;

thread_local! {
    /// Per-thread encode scratch; never shared across threads.
    static CONNECTION_SCRATCH: RefCell<SerializedData> = RefCell::new(SerializedData::new());
}

/// Reply of the stat-shaped operations (Stat, Open, Create).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatReply {
    /// `Success`, or the success-like `FileExists` (create/open on an
    /// existing file still carries a full body).
    pub code: ErrorCode,
    pub inode_id: u64,
    pub node_id: i32,
    pub stat: FileStat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlinkReply {
    pub inode_id: u64,
    pub size: i64,
    pub node_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadDirReply {
    pub last_shard_index: i32,
    pub last_file_name: String,
    pub entries: Vec<DirEntry>,
}

/// A client-side connection to one metadata backend.
pub struct Connection {
    pub server: ServerIdentifier,
    transport: Box<dyn MetaTransport>,
}

impl Connection {
    pub fn new(server: ServerIdentifier, transport: Box<dyn MetaTransport>) -> Self {
        Self { server, transport }
    }

    /// Encodes `info` as a one-item request of `kind`, performs the call,
    /// and decodes the one-item response. `Err` only for codes that are not
    /// success-like.
    fn process_request(
        &self,
        kind: MetaServiceKind,
        mut info: MetaProcessInfo,
    ) -> Result<MetaProcessInfo, ErrorCode> {
        let reply = CONNECTION_SCRATCH.with(|scratch| {
            let mut scratch = scratch.borrow_mut();
            scratch.clear();
            encode_params(kind, std::slice::from_ref(&info), None, &mut scratch)
                .map_err(ErrorCode::from)?;
            self.transport.call(kind, 1, scratch.as_bytes())
        })?;
        if !reply.error_code.is_ok_like() {
            return Err(reply.error_code);
        }
        decode_responses(kind, 0, std::slice::from_mut(&mut info), &reply.response)
            .map_err(ErrorCode::from)?;
        if info.error_code.is_ok_like() {
            Ok(info)
        } else {
            Err(info.error_code)
        }
    }

    fn stat_shaped(&self, kind: MetaServiceKind, path: &str) -> Result<StatReply, ErrorCode> {
        let info = self.process_request(kind, MetaProcessInfo::with_path(path))?;
        Ok(StatReply {
            code: info.error_code,
            inode_id: info.inode_id,
            node_id: info.node_id,
            stat: info.stat,
        })
    }

    pub fn plain_command(&self, command: &str) -> Result<String, ErrorCode> {
        let info =
            self.process_request(MetaServiceKind::PlainCommand, MetaProcessInfo::with_path(command))?;
        Ok(info.plain_response)
    }

    /// `Err(FileExists)` when the directory already exists; callers that
    /// consider that fine check for it.
    pub fn mkdir(&self, path: &str) -> Result<(), ErrorCode> {
        let info = self.process_request(MetaServiceKind::Mkdir, MetaProcessInfo::with_path(path))?;
        match info.error_code {
            ErrorCode::Success => Ok(()),
            code => Err(code),
        }
    }

    pub fn create(&self, path: &str) -> Result<StatReply, ErrorCode> {
        self.stat_shaped(MetaServiceKind::Create, path)
    }

    pub fn stat(&self, path: &str) -> Result<StatReply, ErrorCode> {
        self.stat_shaped(MetaServiceKind::Stat, path)
    }

    pub fn open(&self, path: &str) -> Result<StatReply, ErrorCode> {
        self.stat_shaped(MetaServiceKind::Open, path)
    }

    /// Publishes the final size and mtime of a closed file.
    pub fn close(
        &self,
        path: &str,
        size: i64,
        mtime: i64,
        node_id: i32,
    ) -> Result<(), ErrorCode> {
        let mut info = MetaProcessInfo::with_path(path);
        info.stat.st_size = size;
        info.stat.st_mtim = mtime;
        info.node_id = node_id;
        self.process_request(MetaServiceKind::Close, info)?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<UnlinkReply, ErrorCode> {
        let info = self.process_request(MetaServiceKind::Unlink, MetaProcessInfo::with_path(path))?;
        Ok(UnlinkReply {
            inode_id: info.inode_id,
            size: info.stat.st_size,
            node_id: info.node_id,
        })
    }

    /// `last_shard_index`/`last_file_name` resume a paginated listing from
    /// the cursor of the previous reply; `-1` and `""` start from the top.
    pub fn read_dir(
        &self,
        path: &str,
        max_read_count: i32,
        last_shard_index: i32,
        last_file_name: &str,
    ) -> Result<ReadDirReply, ErrorCode> {
        let mut info = MetaProcessInfo::with_path(path);
        info.readdir_max_read_count = max_read_count;
        info.readdir_last_shard_index = last_shard_index;
        info.readdir_last_file_name = last_file_name.to_string();
        let info = self.process_request(MetaServiceKind::ReadDir, info)?;
        Ok(ReadDirReply {
            last_shard_index: info.readdir_last_shard_index,
            last_file_name: info.readdir_last_file_name,
            entries: info.readdir_entries,
        })
    }

    pub fn open_dir(&self, path: &str) -> Result<u64, ErrorCode> {
        let info = self.process_request(MetaServiceKind::OpenDir, MetaProcessInfo::with_path(path))?;
        Ok(info.inode_id)
    }

    pub fn rmdir(&self, path: &str) -> Result<(), ErrorCode> {
        self.process_request(MetaServiceKind::Rmdir, MetaProcessInfo::with_path(path))?;
        Ok(())
    }

    pub fn rename(&self, src: &str, dst: &str) -> Result<(), ErrorCode> {
        let mut info = MetaProcessInfo::with_path(src);
        info.dst_path = dst.to_string();
        self.process_request(MetaServiceKind::Rename, info)?;
        Ok(())
    }

    /// Timestamps are nanoseconds; `-1` leaves the field unchanged.
    pub fn utime_ns(&self, path: &str, atime: i64, mtime: i64) -> Result<(), ErrorCode> {
        let mut info = MetaProcessInfo::with_path(path);
        info.stat.st_atim = atime;
        info.stat.st_mtim = mtime;
        self.process_request(MetaServiceKind::UtimeNs, info)?;
        Ok(())
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<(), ErrorCode> {
        let mut info = MetaProcessInfo::with_path(path);
        info.stat.st_uid = uid;
        info.stat.st_gid = gid;
        self.process_request(MetaServiceKind::Chown, info)?;
        Ok(())
    }

    pub fn chmod(&self, path: &str, mode: u32) -> Result<(), ErrorCode> {
        let mut info = MetaProcessInfo::with_path(path);
        info.stat.st_mode = mode;
        self.process_request(MetaServiceKind::Chmod, info)?;
        Ok(())
    }
}
