//! Server execution context: owns and serves this node's table shards.
//!
//! One context per node drains its mailbox queue in a single task, so
//! shard storage has exactly one writer and needs no lock. Replies go
//! back through the mailbox to the requesting worker thread.

pub mod consistency;
pub mod storage;

use crate::core::types::server_thread;
use crate::core::{Error, Key, NodeId, RequestId, Result, TableId, ThreadId, Value};
use crate::partition::PartitionManager;
use crate::transport::{Mailbox, Message};
use consistency::{ConsistencyModel, PolicyState};
use std::collections::HashMap;
use std::sync::Arc;
use storage::{Storage, StorageKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// One table's shard plus its consistency state.
struct ShardTable {
    storage: Storage,
    policy: PolicyState,
}

/// The server execution context for one node.
pub struct ServerContext {
    thread: ThreadId,
    node: NodeId,
    servers: Vec<NodeId>,
    mailbox: Arc<Mailbox>,
    tables: HashMap<TableId, ShardTable>,
}

impl ServerContext {
    /// Create the context for `node` in a cluster of `servers`.
    pub fn new(node: NodeId, servers: Vec<NodeId>, mailbox: Arc<Mailbox>) -> Self {
        Self {
            thread: server_thread(node),
            node,
            servers,
            mailbox,
            tables: HashMap::new(),
        }
    }

    /// Install the local shard of a new table.
    pub fn create_table(
        &mut self,
        table: TableId,
        storage: StorageKind,
        model: ConsistencyModel,
    ) {
        let shard = match storage {
            StorageKind::Dense { capacity } => {
                let pm = PartitionManager::range(table, capacity, self.servers.clone());
                let (base, len) = pm.dense_shard(self.node).unwrap_or((0, 0));
                Storage::dense(base, len)
            }
            StorageKind::Sparse => Storage::sparse(),
        };
        debug!(table, node = self.node, "installed shard table");
        self.tables.insert(
            table,
            ShardTable {
                storage: shard,
                policy: PolicyState::new(model),
            },
        );
    }

    /// Drain the receive queue until `Shutdown` arrives.
    ///
    /// A Get still deferred by a staleness bound at shutdown is a
    /// fault, not silently discarded.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Result<()> {
        info!(node = self.node, thread = self.thread, "server context running");
        while let Some(bytes) = rx.recv().await {
            match Message::decode(&bytes)? {
                Message::GetRequest {
                    table,
                    from,
                    request,
                    keys,
                } => self.handle_get(table, from, request, keys)?,
                Message::AddRequest {
                    table,
                    from,
                    request,
                    keys,
                    deltas,
                } => self.handle_add(table, from, request, &keys, &deltas)?,
                Message::Clock { table, from } => self.handle_clock(table, from)?,
                Message::CreateTable {
                    table,
                    storage,
                    consistency,
                } => self.create_table(table, storage, consistency),
                Message::Shutdown => break,
                other => warn!(?other, "server received unexpected message"),
            }
        }

        let deferred: usize = self
            .tables
            .values()
            .map(|t| match &t.policy {
                PolicyState::Asp => 0,
                PolicyState::Ssp(tracker) => tracker.deferred_count(),
            })
            .sum();
        if deferred > 0 {
            error!(node = self.node, deferred, "gets still deferred at shutdown");
            return Err(Error::PendingAtShutdown(deferred));
        }
        info!(node = self.node, "server context stopped");
        Ok(())
    }

    fn handle_get(
        &mut self,
        table: TableId,
        from: ThreadId,
        request: RequestId,
        keys: Vec<Key>,
    ) -> Result<()> {
        let shard = self.tables.get_mut(&table).ok_or(Error::UnknownTable(table))?;
        match &mut shard.policy {
            PolicyState::Asp => {}
            PolicyState::Ssp(tracker) => {
                if !tracker.admits(from) {
                    debug!(table, from, request, "get deferred by staleness bound");
                    tracker.defer(from, request, keys);
                    return Ok(());
                }
            }
        }
        let values = shard.storage.apply_get(&keys);
        debug!(table, from, request, n = keys.len(), "served get");
        self.mailbox.send_message(
            from,
            &Message::GetResponse {
                request,
                keys,
                values,
            },
        )
    }

    fn handle_add(
        &mut self,
        table: TableId,
        from: ThreadId,
        request: RequestId,
        keys: &[Key],
        deltas: &[Value],
    ) -> Result<()> {
        let shard = self.tables.get_mut(&table).ok_or(Error::UnknownTable(table))?;
        shard.storage.apply_add(keys, deltas);
        debug!(table, from, request, n = keys.len(), "applied add");
        self.mailbox.send_message(from, &Message::AddResponse { request })
    }

    fn handle_clock(&mut self, table: TableId, from: ThreadId) -> Result<()> {
        let mailbox = Arc::clone(&self.mailbox);
        let shard = self.tables.get_mut(&table).ok_or(Error::UnknownTable(table))?;
        let ready = match &mut shard.policy {
            PolicyState::Asp => Vec::new(),
            PolicyState::Ssp(tracker) => tracker.advance(from),
        };
        for get in ready {
            let values = shard.storage.apply_get(&get.keys);
            debug!(table, from = get.from, request = get.request, "released deferred get");
            mailbox.send_message(
                get.from,
                &Message::GetResponse {
                    request: get.request,
                    keys: get.keys,
                    values,
                },
            )?;
        }
        Ok(())
    }
}
