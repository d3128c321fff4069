//! Common types used across ParaKV modules.

use serde::{Deserialize, Serialize};

/// Identifier of one scalar parameter within a table. Totally ordered;
/// the ordering drives both partitioning and sparse-vector merging.
pub type Key = u64;

/// Numeric content of one parameter.
pub type Value = f64;

/// Identifier of a cluster member.
pub type NodeId = u32;

/// Identifier of a table within the cluster.
pub type TableId = u32;

/// Identifier of an execution context (worker or server) cluster-wide.
pub type ThreadId = u32;

/// Identifier of one logical Get/Add, unique per originating thread.
pub type RequestId = u32;

/// Immutable description of a cluster member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Numeric node id, unique in the cluster
    pub id: NodeId,
    /// Hostname the node's transport binds to
    pub hostname: String,
    /// Port the node's transport binds to
    pub port: u16,
}

impl Node {
    /// Create a new node description.
    pub fn new(id: NodeId, hostname: &str, port: u16) -> Self {
        Self {
            id,
            hostname: hostname.to_string(),
            port,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node {{ id={} hostname={} port={} }}",
            self.id, self.hostname, self.port
        )
    }
}

/// Maximum execution contexts per node; fixes the thread-id layout.
pub const THREADS_PER_NODE: u32 = 100;

/// Thread id of the server execution context on `node`.
///
/// Every node computes the same layout without communication, so
/// clients can address any shard's server directly.
pub fn server_thread(node: NodeId) -> ThreadId {
    node * THREADS_PER_NODE
}

/// Thread id of worker slot `index` on `node`.
pub fn worker_thread(node: NodeId, index: u32) -> ThreadId {
    debug_assert!(index + 1 < THREADS_PER_NODE);
    node * THREADS_PER_NODE + 1 + index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_display() {
        let node = Node::new(3, "worker-3", 23847);
        let s = node.to_string();
        assert!(s.contains("id=3"));
        assert!(s.contains("worker-3"));
    }

    #[test]
    fn test_node_equality() {
        let a = Node::new(0, "host", 1000);
        let b = Node::new(0, "host", 1000);
        let c = Node::new(1, "host", 1000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_thread_id_layout() {
        assert_eq!(server_thread(0), 0);
        assert_eq!(server_thread(2), 200);
        assert_eq!(worker_thread(0, 0), 1);
        assert_eq!(worker_thread(1, 4), 105);
        // Worker ids never collide with server ids
        for node in 0..4 {
            for i in 0..10 {
                assert_ne!(worker_thread(node, i), server_thread(node));
            }
        }
    }
}
