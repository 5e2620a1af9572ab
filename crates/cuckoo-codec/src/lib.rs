//! Serialized record stream and metadata wire codec.
//!
//! Metadata RPCs carry their per-item parameters and responses as opaque
//! blobs: length-prefixed, aligned concatenations of individually verified
//! binary records. This crate owns that container ([`SerializedData`]), the
//! service-kind enumeration, the denormalized per-item record
//! ([`MetaProcessInfo`]) both planes share, and the encode/decode entry
//! points. It is purely bytes-in/bytes-out and is used unchanged by the
//! client connection, the connection pool, and the database-side worker.

mod codec;
mod info;
mod serialized;
mod service;
mod wire;

pub use codec::{
    decode_params, decode_responses, encode_params, encode_responses, CodecError,
};
pub use info::{DirEntry, MetaProcessInfo};
pub use serialized::{SerializedData, SERIALIZED_DATA_ALIGNMENT};
pub use service::MetaServiceKind;
