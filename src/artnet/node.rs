//! Node Registry (`spec.md` §2 component A / §3 `ArtNetNode`).
//!
//! Reader-preferring lock guarding an in-memory map, as `spec.md` §5
//! specifies ("reader-preferring mutex (readers: bulk list; writer:
//! upsert)"). `parking_lot::RwLock` is the teacher's workspace choice for
//! this kind of non-async shared state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use parking_lot::RwLock;

use crate::artnet::codec::ArtPollReply;

#[derive(Debug, Clone)]
pub struct ArtNetNode {
    pub ip: IpAddr,
    pub short_name: String,
    pub long_name: String,
    pub node_report: String,
    pub mac_address: [u8; 6],
    pub last_seen: Instant,
}

impl ArtNetNode {
    fn from_reply(ip: IpAddr, reply: &ArtPollReply) -> Self {
        Self {
            ip,
            short_name: reply.short_name.clone(),
            long_name: reply.long_name.clone(),
            node_report: reply.node_report.clone(),
            mac_address: reply.mac_address,
            last_seen: Instant::now(),
        }
    }
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<IpAddr, ArtNetNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node from a received ArtPollReply, keyed by the
    /// observed source IP. Nodes are never evicted except on process exit
    /// (`spec.md` §3).
    pub fn upsert(&self, source_ip: IpAddr, reply: &ArtPollReply) {
        let node = ArtNetNode::from_reply(source_ip, reply);
        self.nodes.write().insert(source_ip, node);
    }

    pub fn get(&self, ip: &IpAddr) -> Option<ArtNetNode> {
        self.nodes.read().get(ip).cloned()
    }

    pub fn list(&self) -> Vec<ArtNetNode> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn reply() -> ArtPollReply {
        ArtPollReply {
            ip_address: Ipv4Addr::new(10, 0, 0, 5),
            port: 6454,
            short_name: "Node".into(),
            long_name: "Node Long".into(),
            node_report: "OK".into(),
            mac_address: [0; 6],
        }
    }

    #[test]
    fn upsert_refreshes_existing_entry() {
        let registry = NodeRegistry::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        registry.upsert(ip, &reply());
        assert_eq!(registry.len(), 1);
        registry.upsert(ip, &reply());
        assert_eq!(registry.len(), 1, "same IP should refresh, not duplicate");
    }
}
