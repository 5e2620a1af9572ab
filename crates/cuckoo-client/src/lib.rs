//! Client-side metadata plane: the synchronous per-endpoint connection and
//! the pooled, batching dispatcher.
//!
//! Callers on arbitrary threads submit metadata jobs through
//! [`ConnectionPool::dispatch`]; jobs of the six batchable kinds are
//! coalesced into aggregating tasks before a worker connection executes
//! them against its database session. [`Connection`] is the simpler
//! synchronous path used where batching does not apply, one RPC channel to
//! one metadata endpoint.

mod connection;
mod pool;
mod task;
mod transport;
mod worker;

pub use connection::{Connection, ReadDirReply, StatReply, UnlinkReply};
pub use pool::{BatchKind, ConnectionPool};
pub use task::Task;
pub use transport::{
    LoopbackTransport, MetaReply, MetaService, MetaTransport, TcpMetaServer, TcpMetaTransport,
};
pub use worker::{MetaBackend, WorkerConnection};
