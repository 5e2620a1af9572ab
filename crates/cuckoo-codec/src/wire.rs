//! Wire shapes of individual parameter and response records.
//!
//! Each record is a little-endian binrw value with a one-byte variant tag;
//! decoding verifies the tag and every length before any field is trusted.
//! The field sets per service kind are wire-stable.

use binrw::io::{Read, Seek, Write};
use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use cuckoo_types::FileStat;

/// A length-prefixed UTF-8 string: `u32` byte length followed by the bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireStr(pub String);

impl From<&str> for WireStr {
    fn from(s: &str) -> Self {
        WireStr(s.to_string())
    }
}

impl From<String> for WireStr {
    fn from(s: String) -> Self {
        WireStr(s)
    }
}

impl BinRead for WireStr {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: (),
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let len = u32::read_options(reader, endian, ())?;
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        match String::from_utf8(bytes) {
            Ok(s) => Ok(WireStr(s)),
            Err(_) => Err(binrw::Error::AssertFail {
                pos,
                message: "string field is not valid UTF-8".to_string(),
            }),
        }
    }
}

impl BinWrite for WireStr {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: (),
    ) -> BinResult<()> {
        (self.0.len() as u32).write_options(writer, endian, ())?;
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }
}

/// The stat block as encoded on the wire.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireStat {
    pub st_ino: u64,
    pub st_dev: u64,
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u64,
    pub st_size: i64,
    pub st_blksize: i64,
    pub st_blocks: i64,
    pub st_atim: i64,
    pub st_mtim: i64,
    pub st_ctim: i64,
}

impl From<FileStat> for WireStat {
    fn from(s: FileStat) -> Self {
        Self {
            st_ino: s.st_ino,
            st_dev: s.st_dev,
            st_mode: s.st_mode,
            st_nlink: s.st_nlink,
            st_uid: s.st_uid,
            st_gid: s.st_gid,
            st_rdev: s.st_rdev,
            st_size: s.st_size,
            st_blksize: s.st_blksize,
            st_blocks: s.st_blocks,
            st_atim: s.st_atim,
            st_mtim: s.st_mtim,
            st_ctim: s.st_ctim,
        }
    }
}

impl From<WireStat> for FileStat {
    fn from(s: WireStat) -> Self {
        Self {
            st_ino: s.st_ino,
            st_dev: s.st_dev,
            st_mode: s.st_mode,
            st_nlink: s.st_nlink,
            st_uid: s.st_uid,
            st_gid: s.st_gid,
            st_rdev: s.st_rdev,
            st_size: s.st_size,
            st_blksize: s.st_blksize,
            st_blocks: s.st_blocks,
            st_atim: s.st_atim,
            st_mtim: s.st_mtim,
            st_ctim: s.st_ctim,
        }
    }
}

/// One parameter record.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub enum ParamRecord {
    /// Mkdir, Create, Stat, Open, Unlink, OpenDir, Rmdir.
    #[brw(magic = 0u8)]
    PathOnly { path: WireStr },

    #[brw(magic = 1u8)]
    MkdirSubMkdir {
        parent_id: u64,
        name: WireStr,
        inode_id: u64,
    },

    #[brw(magic = 2u8)]
    MkdirSubCreate {
        parent_id_part_id: u32,
        name: WireStr,
        inode_id: u64,
        st_mode: u32,
        st_mtim: i64,
        st_size: i64,
    },

    #[brw(magic = 3u8)]
    Close {
        path: WireStr,
        st_size: i64,
        st_mtim: i64,
        node_id: i32,
    },

    #[brw(magic = 4u8)]
    ReadDir {
        path: WireStr,
        max_read_count: i32,
        last_shard_index: i32,
        last_file_name: WireStr,
    },

    #[brw(magic = 5u8)]
    RmdirSubRmdir { parent_id: u64, name: WireStr },

    #[brw(magic = 6u8)]
    RmdirSubUnlink {
        parent_id_part_id: u32,
        name: WireStr,
    },

    #[brw(magic = 7u8)]
    Rename { src: WireStr, dst: WireStr },

    #[brw(magic = 8u8)]
    RenameSubRenameLocally {
        src_parent_id: u64,
        src_parent_id_part_id: u32,
        src_name: WireStr,
        dst_parent_id: u64,
        dst_parent_id_part_id: u32,
        dst_name: WireStr,
        #[br(map = |v: u8| v != 0)]
        #[bw(map = |v: &bool| u8::from(*v))]
        target_is_directory: bool,
        directory_inode_id: u64,
        src_lock_order: i32,
    },

    #[brw(magic = 9u8)]
    RenameSubCreate {
        parent_id_part_id: u32,
        name: WireStr,
        stat: WireStat,
        node_id: i32,
    },

    #[brw(magic = 10u8)]
    UtimeNs {
        path: WireStr,
        st_atim: i64,
        st_mtim: i64,
    },

    #[brw(magic = 11u8)]
    Chown {
        path: WireStr,
        st_uid: u32,
        st_gid: u32,
    },

    #[brw(magic = 12u8)]
    Chmod { path: WireStr, st_mode: u32 },

    #[brw(magic = 13u8)]
    PlainCommand { command: WireStr },
}

/// One directory entry inside a `ReadDir` response.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireDirEntry {
    pub file_name: WireStr,
    pub mode: u32,
}

/// One response record: the error code, then a kind-dependent body.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub error_code: i32,
    pub body: ResponseBody,
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Error-code-only response.
    #[brw(magic = 0u8)]
    None,

    /// Stat, Open, Create, and the cross-shard arm of RenameSubRenameLocally.
    #[brw(magic = 1u8)]
    Stat { node_id: i32, stat: WireStat },

    #[brw(magic = 2u8)]
    Unlink {
        inode_id: u64,
        st_size: i64,
        node_id: i32,
    },

    #[brw(magic = 3u8)]
    ReadDir {
        last_shard_index: i32,
        last_file_name: WireStr,
        #[br(temp)]
        #[bw(calc = entries.len() as u32)]
        count: u32,
        #[br(count = count)]
        entries: Vec<WireDirEntry>,
    },

    #[brw(magic = 4u8)]
    OpenDir { inode_id: u64 },

    #[brw(magic = 5u8)]
    PlainCommand { output: WireStr },
}
