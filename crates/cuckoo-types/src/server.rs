//! Identity of one metadata or data endpoint.

use serde::{Deserialize, Serialize};

/// One server endpoint: address, port, and the cluster-assigned id.
///
/// Equality and hashing cover all three fields; two listeners on the same
/// address with different ids are distinct servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerIdentifier {
    pub ip: String,
    pub port: u16,
    pub id: i32,
}

impl ServerIdentifier {
    pub fn new(ip: impl Into<String>, port: u16, id: i32) -> Self {
        Self {
            ip: ip.into(),
            port,
            id,
        }
    }

    /// Parses an `ip:port` endpoint string; `id` defaults to 0.
    pub fn parse(endpoint: &str) -> Option<Self> {
        let (ip, port) = endpoint.rsplit_once(':')?;
        Some(Self {
            ip: ip.to_string(),
            port: port.parse().ok()?,
            id: 0,
        })
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Display for ServerIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.ip, self.port, self.id)
    }
}
