//! Encode/decode of parameter and response blobs, per service kind.
//!
//! The blob layout is the serialized stream of `wire` records. Decoding
//! verifies structure before trusting any field; a single bad record fails
//! the whole blob, and the caller fails the enclosing task. These functions
//! are callable from both the client and the database-side worker.

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use cuckoo_types::ErrorCode;
use thiserror::Error;

use crate::info::{DirEntry, MetaProcessInfo};
use crate::serialized::{next_several_item_size, record_at, SerializedData};
use crate::service::MetaServiceKind;
use crate::wire::{ParamRecord, ResponseBody, ResponseRecord, WireDirEntry};

#[derive(Debug, Error)]
pub enum CodecError {
    /// A segment header is truncated or a length runs past the buffer end.
    #[error("serialized stream is corrupt at offset {offset}")]
    Corrupt { offset: usize },

    /// A record decoded cleanly but does not belong to the service kind.
    #[error("record does not match service kind {kind:?}")]
    UnexpectedRecord { kind: MetaServiceKind },

    #[error("malformed record: {0}")]
    Malformed(#[from] binrw::Error),
}

impl From<CodecError> for ErrorCode {
    fn from(_: CodecError) -> ErrorCode {
        ErrorCode::ProgramError
    }
}

fn push_param(out: &mut SerializedData, record: &ParamRecord) -> Result<(), CodecError> {
    let mut cursor = Cursor::new(Vec::new());
    record.write(&mut cursor)?;
    out.push_record(&cursor.into_inner());
    Ok(())
}

fn push_response(out: &mut SerializedData, record: &ResponseRecord) -> Result<(), CodecError> {
    let mut cursor = Cursor::new(Vec::new());
    record.write(&mut cursor)?;
    out.push_record(&cursor.into_inner());
    Ok(())
}

fn param_record(kind: MetaServiceKind, info: &MetaProcessInfo) -> ParamRecord {
    use MetaServiceKind::*;
    match kind {
        Mkdir | Create | Stat | Open | Unlink | OpenDir | Rmdir => ParamRecord::PathOnly {
            path: info.path.as_str().into(),
        },
        MkdirSubMkdir => ParamRecord::MkdirSubMkdir {
            parent_id: info.parent_id,
            name: info.name.as_str().into(),
            inode_id: info.inode_id,
        },
        MkdirSubCreate => ParamRecord::MkdirSubCreate {
            parent_id_part_id: info.parent_id_part_id,
            name: info.name.as_str().into(),
            inode_id: info.inode_id,
            st_mode: info.stat.st_mode,
            st_mtim: info.stat.st_mtim,
            st_size: info.stat.st_size,
        },
        Close => ParamRecord::Close {
            path: info.path.as_str().into(),
            st_size: info.stat.st_size,
            st_mtim: info.stat.st_mtim,
            node_id: info.node_id,
        },
        ReadDir => ParamRecord::ReadDir {
            path: info.path.as_str().into(),
            max_read_count: info.readdir_max_read_count,
            last_shard_index: info.readdir_last_shard_index,
            last_file_name: info.readdir_last_file_name.as_str().into(),
        },
        RmdirSubRmdir => ParamRecord::RmdirSubRmdir {
            parent_id: info.parent_id,
            name: info.name.as_str().into(),
        },
        RmdirSubUnlink => ParamRecord::RmdirSubUnlink {
            parent_id_part_id: info.parent_id_part_id,
            name: info.name.as_str().into(),
        },
        Rename => ParamRecord::Rename {
            src: info.path.as_str().into(),
            dst: info.dst_path.as_str().into(),
        },
        RenameSubRenameLocally => ParamRecord::RenameSubRenameLocally {
            src_parent_id: info.parent_id,
            src_parent_id_part_id: info.parent_id_part_id,
            src_name: info.name.as_str().into(),
            dst_parent_id: info.dst_parent_id,
            dst_parent_id_part_id: info.dst_parent_id_part_id,
            dst_name: info.dst_name.as_str().into(),
            target_is_directory: info.target_is_directory,
            directory_inode_id: info.inode_id,
            src_lock_order: info.src_lock_order,
        },
        RenameSubCreate => ParamRecord::RenameSubCreate {
            parent_id_part_id: info.parent_id_part_id,
            name: info.name.as_str().into(),
            stat: info.stat.into(),
            node_id: info.node_id,
        },
        UtimeNs => ParamRecord::UtimeNs {
            path: info.path.as_str().into(),
            st_atim: info.stat.st_atim,
            st_mtim: info.stat.st_mtim,
        },
        Chown => ParamRecord::Chown {
            path: info.path.as_str().into(),
            st_uid: info.stat.st_uid,
            st_gid: info.stat.st_gid,
        },
        Chmod => ParamRecord::Chmod {
            path: info.path.as_str().into(),
            st_mode: info.stat.st_mode,
        },
        PlainCommand => ParamRecord::PlainCommand {
            command: info.path.as_str().into(),
        },
    }
}

/// Encodes parameter records for `infos` into `out`.
///
/// When `index` is given, it selects (and orders) the items to encode, the
/// way a two-phase operation re-issues a permuted subset of its batch.
pub fn encode_params(
    kind: MetaServiceKind,
    infos: &[MetaProcessInfo],
    index: Option<&[usize]>,
    out: &mut SerializedData,
) -> Result<(), CodecError> {
    match index {
        Some(index) => {
            for &i in index {
                push_param(out, &param_record(kind, &infos[i]))?;
            }
        }
        None => {
            for info in infos {
                push_param(out, &param_record(kind, info))?;
            }
        }
    }
    Ok(())
}

fn apply_param(
    kind: MetaServiceKind,
    record: ParamRecord,
    info: &mut MetaProcessInfo,
) -> Result<(), CodecError> {
    use MetaServiceKind::*;
    match (kind, record) {
        (
            Mkdir | Create | Stat | Open | Unlink | OpenDir | Rmdir,
            ParamRecord::PathOnly { path },
        ) => {
            info.path = path.0;
        }
        (
            MkdirSubMkdir,
            ParamRecord::MkdirSubMkdir {
                parent_id,
                name,
                inode_id,
            },
        ) => {
            info.parent_id = parent_id;
            info.name = name.0;
            info.inode_id = inode_id;
        }
        (
            MkdirSubCreate,
            ParamRecord::MkdirSubCreate {
                parent_id_part_id,
                name,
                inode_id,
                st_mode,
                st_mtim,
                st_size,
            },
        ) => {
            info.parent_id_part_id = parent_id_part_id;
            info.name = name.0;
            info.inode_id = inode_id;
            info.stat.st_mode = st_mode;
            info.stat.st_mtim = st_mtim;
            info.stat.st_size = st_size;
        }
        (
            Close,
            ParamRecord::Close {
                path,
                st_size,
                st_mtim,
                node_id,
            },
        ) => {
            info.path = path.0;
            info.stat.st_size = st_size;
            info.stat.st_mtim = st_mtim;
            info.node_id = node_id;
        }
        (
            ReadDir,
            ParamRecord::ReadDir {
                path,
                max_read_count,
                last_shard_index,
                last_file_name,
            },
        ) => {
            info.path = path.0;
            info.readdir_max_read_count = max_read_count;
            info.readdir_last_shard_index = last_shard_index;
            info.readdir_last_file_name = last_file_name.0;
        }
        (RmdirSubRmdir, ParamRecord::RmdirSubRmdir { parent_id, name }) => {
            info.parent_id = parent_id;
            info.name = name.0;
        }
        (
            RmdirSubUnlink,
            ParamRecord::RmdirSubUnlink {
                parent_id_part_id,
                name,
            },
        ) => {
            info.parent_id_part_id = parent_id_part_id;
            info.name = name.0;
        }
        (Rename, ParamRecord::Rename { src, dst }) => {
            info.path = src.0;
            info.dst_path = dst.0;
        }
        (
            RenameSubRenameLocally,
            ParamRecord::RenameSubRenameLocally {
                src_parent_id,
                src_parent_id_part_id,
                src_name,
                dst_parent_id,
                dst_parent_id_part_id,
                dst_name,
                target_is_directory,
                directory_inode_id,
                src_lock_order,
            },
        ) => {
            info.parent_id = src_parent_id;
            info.parent_id_part_id = src_parent_id_part_id;
            info.name = src_name.0;
            info.dst_parent_id = dst_parent_id;
            info.dst_parent_id_part_id = dst_parent_id_part_id;
            info.dst_name = dst_name.0;
            info.target_is_directory = target_is_directory;
            info.inode_id = directory_inode_id;
            info.src_lock_order = src_lock_order;
        }
        (
            RenameSubCreate,
            ParamRecord::RenameSubCreate {
                parent_id_part_id,
                name,
                stat,
                node_id,
            },
        ) => {
            info.parent_id_part_id = parent_id_part_id;
            info.name = name.0;
            info.inode_id = stat.st_ino;
            info.stat = stat.into();
            info.node_id = node_id;
        }
        (
            UtimeNs,
            ParamRecord::UtimeNs {
                path,
                st_atim,
                st_mtim,
            },
        ) => {
            info.path = path.0;
            info.stat.st_atim = st_atim;
            info.stat.st_mtim = st_mtim;
        }
        (Chown, ParamRecord::Chown { path, st_uid, st_gid }) => {
            info.path = path.0;
            info.stat.st_uid = st_uid;
            info.stat.st_gid = st_gid;
        }
        (Chmod, ParamRecord::Chmod { path, st_mode }) => {
            info.path = path.0;
            info.stat.st_mode = st_mode;
        }
        (PlainCommand, ParamRecord::PlainCommand { command }) => {
            info.path = command.0;
        }
        _ => return Err(CodecError::UnexpectedRecord { kind }),
    }
    Ok(())
}

/// Decodes `count` parameter records of `kind` from `data`.
pub fn decode_params(
    kind: MetaServiceKind,
    count: usize,
    data: &[u8],
) -> Result<Vec<MetaProcessInfo>, CodecError> {
    let mut infos = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let (payload, next) =
            record_at(data, offset).ok_or(CodecError::Corrupt { offset })?;
        let record = ParamRecord::read(&mut Cursor::new(payload))?;
        let mut info = MetaProcessInfo::default();
        apply_param(kind, record, &mut info)?;
        infos.push(info);
        offset = next;
    }
    Ok(infos)
}

fn response_record(kind: MetaServiceKind, info: &MetaProcessInfo) -> ResponseRecord {
    use MetaServiceKind::*;
    // Failures (other than the success-like FILE_EXISTS) never carry a body.
    if !info.error_code.is_ok_like() {
        return ResponseRecord {
            error_code: info.error_code.to_wire(),
            body: ResponseBody::None,
        };
    }
    let body = match kind {
        Mkdir | MkdirSubMkdir | MkdirSubCreate | Close | Rmdir | RmdirSubRmdir
        | RmdirSubUnlink | Rename | RenameSubCreate | UtimeNs | Chown | Chmod => {
            ResponseBody::None
        }
        Create | Stat | Open => ResponseBody::Stat {
            node_id: info.node_id,
            stat: info.stat.into(),
        },
        Unlink => ResponseBody::Unlink {
            inode_id: info.inode_id,
            st_size: info.stat.st_size,
            node_id: info.node_id,
        },
        ReadDir => ResponseBody::ReadDir {
            last_shard_index: info.readdir_last_shard_index,
            last_file_name: info.readdir_last_file_name.as_str().into(),
            entries: info
                .readdir_entries
                .iter()
                .map(|e| WireDirEntry {
                    file_name: e.file_name.as_str().into(),
                    mode: e.mode,
                })
                .collect(),
        },
        OpenDir => ResponseBody::OpenDir {
            inode_id: info.inode_id,
        },
        RenameSubRenameLocally => {
            // A stat block rides along only when the rename crossed a shard
            // boundary: source on a partition, destination on the root.
            if info.parent_id_part_id != 0 && info.dst_parent_id_part_id == 0 {
                ResponseBody::Stat {
                    node_id: info.node_id,
                    stat: info.stat.into(),
                }
            } else {
                ResponseBody::None
            }
        }
        PlainCommand => ResponseBody::PlainCommand {
            output: info.plain_response.as_str().into(),
        },
    };
    ResponseRecord {
        error_code: info.error_code.to_wire(),
        body,
    }
}

/// Encodes one response record per item of `infos` into `out`.
pub fn encode_responses(
    kind: MetaServiceKind,
    infos: &[MetaProcessInfo],
    out: &mut SerializedData,
) -> Result<(), CodecError> {
    for info in infos {
        push_response(out, &response_record(kind, info))?;
    }
    Ok(())
}

fn apply_response(
    kind: MetaServiceKind,
    record: ResponseRecord,
    info: &mut MetaProcessInfo,
) -> Result<(), CodecError> {
    use MetaServiceKind::*;
    info.error_code = ErrorCode::from_wire(record.error_code);
    match (kind, record.body) {
        (_, ResponseBody::None) => {}
        (Create | Stat | Open, ResponseBody::Stat { node_id, stat }) => {
            info.node_id = node_id;
            info.inode_id = stat.st_ino;
            info.stat = stat.into();
        }
        (RenameSubRenameLocally, ResponseBody::Stat { node_id, stat }) => {
            info.node_id = node_id;
            info.inode_id = stat.st_ino;
            info.stat = stat.into();
        }
        (
            Unlink,
            ResponseBody::Unlink {
                inode_id,
                st_size,
                node_id,
            },
        ) => {
            info.inode_id = inode_id;
            info.stat.st_size = st_size;
            info.node_id = node_id;
        }
        (
            ReadDir,
            ResponseBody::ReadDir {
                last_shard_index,
                last_file_name,
                entries,
            },
        ) => {
            info.readdir_last_shard_index = last_shard_index;
            info.readdir_last_file_name = last_file_name.0;
            info.readdir_entries = entries
                .into_iter()
                .map(|e| DirEntry {
                    file_name: e.file_name.0,
                    mode: e.mode,
                })
                .collect();
        }
        (OpenDir, ResponseBody::OpenDir { inode_id }) => {
            info.inode_id = inode_id;
        }
        (PlainCommand, ResponseBody::PlainCommand { output }) => {
            info.plain_response = output.0;
        }
        _ => return Err(CodecError::UnexpectedRecord { kind }),
    }
    Ok(())
}

/// Decodes response records of `kind` from `data` into `infos`, skipping
/// the first `skip` records.
///
/// Batch callers use `skip` to address their own slice of an aggregated
/// response without decoding items that belong to other callers.
pub fn decode_responses(
    kind: MetaServiceKind,
    skip: usize,
    infos: &mut [MetaProcessInfo],
    data: &[u8],
) -> Result<(), CodecError> {
    let mut offset = if skip == 0 {
        0
    } else {
        next_several_item_size(data, 0, skip).ok_or(CodecError::Corrupt { offset: 0 })?
    };
    for info in infos.iter_mut() {
        let (payload, next) =
            record_at(data, offset).ok_or(CodecError::Corrupt { offset })?;
        let record = ResponseRecord::read(&mut Cursor::new(payload))?;
        apply_response(kind, record, info)?;
        offset = next;
    }
    Ok(())
}
