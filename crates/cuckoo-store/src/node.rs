//! The peer node table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cuckoo_types::{CuckooConfig, ErrorCode};

use crate::remote_io::RemoteIoClient;

/// The data-plane RPC surface between store nodes.
///
/// Every request names the `(inode_id, node_id)` it is for; a server
/// refuses requests whose node id is not its own.
pub trait DataRpc: Send + Sync {
    /// One logical block; short or empty when the block crosses or passes
    /// end of file.
    fn read_block(
        &self,
        inode_id: u64,
        node_id: i32,
        block_index: u64,
        block_size: u32,
    ) -> Result<Vec<u8>, ErrorCode>;

    /// Whole payload of a small file.
    fn read_small_file(&self, inode_id: u64, node_id: i32) -> Result<Vec<u8>, ErrorCode>;

    fn write_at(
        &self,
        inode_id: u64,
        node_id: i32,
        data: &[u8],
        offset: u64,
    ) -> Result<usize, ErrorCode>;

    fn truncate(&self, inode_id: u64, node_id: i32, size: u64) -> Result<(), ErrorCode>;

    /// Publishes the final size and mtime when the writer closes.
    fn close_commit(
        &self,
        inode_id: u64,
        node_id: i32,
        size: u64,
        mtime: i64,
    ) -> Result<(), ErrorCode>;
}

/// This node's identity and its view of the cluster.
pub struct StoreNode {
    node_id: i32,
    /// Data endpoints indexed by node id, from `CUCKOO_CLUSTER_VIEW`.
    views: Vec<String>,
    peers: RwLock<HashMap<i32, Arc<dyn DataRpc>>>,
}

impl StoreNode {
    pub fn new(node_id: i32, views: Vec<String>) -> Self {
        Self {
            node_id,
            views,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CuckooConfig) -> Self {
        Self::new(config.node_id, config.views())
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub fn is_local(&self, node_id: i32) -> bool {
        node_id == self.node_id
    }

    /// Registers (or replaces) the client for a peer; tests wire in-process
    /// peers this way.
    pub fn register_peer(&self, node_id: i32, peer: Arc<dyn DataRpc>) {
        self.peers.write().unwrap().insert(node_id, peer);
    }

    /// The client for `node_id`, connecting from the cluster view on first
    /// use.
    pub fn peer(&self, node_id: i32) -> Result<Arc<dyn DataRpc>, ErrorCode> {
        if let Some(peer) = self.peers.read().unwrap().get(&node_id) {
            return Ok(peer.clone());
        }
        let endpoint = usize::try_from(node_id)
            .ok()
            .and_then(|id| self.views.get(id))
            .ok_or_else(|| {
                log::error!("node {node_id} is not in the cluster view");
                ErrorCode::NotFound
            })?;
        let client: Arc<dyn DataRpc> = Arc::new(RemoteIoClient::new(endpoint.clone()));
        let mut peers = self.peers.write().unwrap();
        Ok(peers.entry(node_id).or_insert(client).clone())
    }
}

#[cfg(test)]
mod test {
    use super::StoreNode;

    #[test]
    fn locality_and_view_lookup() {
        let node = StoreNode::new(1, vec!["10.0.0.1:56039".into(), "10.0.0.2:56039".into()]);
        assert!(node.is_local(1));
        assert!(!node.is_local(0));
        assert!(node.peer(0).is_ok());
        assert!(node.peer(5).is_err());
        assert!(node.peer(-3).is_err());
    }
}
