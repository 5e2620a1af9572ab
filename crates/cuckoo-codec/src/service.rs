//! The metadata service-kind enumeration.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// One metadata operation kind.
///
/// The `*Sub*` kinds are the internal second phases of two-phase operations:
/// a cross-shard mkdir first registers the inode under the parent shard
/// (`MkdirSubMkdir`) and then materializes the directory entry
/// (`MkdirSubCreate`), and similarly for rmdir and rename. The numeric
/// values are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(i32)]
pub enum MetaServiceKind {
    Mkdir = 0,
    MkdirSubMkdir = 1,
    MkdirSubCreate = 2,
    Create = 3,
    Stat = 4,
    Open = 5,
    Close = 6,
    Unlink = 7,
    ReadDir = 8,
    OpenDir = 9,
    Rmdir = 10,
    RmdirSubRmdir = 11,
    RmdirSubUnlink = 12,
    Rename = 13,
    RenameSubRenameLocally = 14,
    RenameSubCreate = 15,
    UtimeNs = 16,
    Chown = 17,
    Chmod = 18,
    PlainCommand = 19,
}

impl MetaServiceKind {
    pub fn from_wire(raw: i32) -> Option<MetaServiceKind> {
        MetaServiceKind::from_i32(raw)
    }

    pub fn to_wire(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod test {
    use super::MetaServiceKind;

    #[test]
    fn wire_round_trip() {
        for raw in 0..20 {
            let kind = MetaServiceKind::from_wire(raw).unwrap();
            assert_eq!(kind.to_wire(), raw);
        }
        assert!(MetaServiceKind::from_wire(20).is_none());
        assert!(MetaServiceKind::from_wire(-1).is_none());
    }
}
