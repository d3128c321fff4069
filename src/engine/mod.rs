//! Engine: table creation, execution contexts, and task orchestration.
//!
//! One engine instance per cluster node. The node list is an explicit
//! configuration object handed in at construction, never process-wide
//! state, so a whole cluster can be simulated in one test process by
//! giving several engines the same mailbox.

pub mod task;

pub use task::{MlTask, TaskFn};

use crate::core::types::{server_thread, worker_thread, THREADS_PER_NODE};
use crate::core::{Error, Node, NodeId, Result, TableId};
use crate::partition::PartitionManager;
use crate::server::consistency::ConsistencyModel;
use crate::server::storage::StorageKind;
use crate::server::ServerContext;
use crate::transport::{Mailbox, Message};
use crate::worker::{CallbackRunner, Info};
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Engine lifecycle: linear, no re-entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Stopped,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Created => "created",
            State::Running => "running",
            State::Stopped => "stopped",
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker slots this node offers to tasks.
    pub workers_per_node: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { workers_per_node: 5 }
    }
}

struct TableMeta {
    storage: StorageKind,
    consistency: ConsistencyModel,
    partition: Arc<PartitionManager>,
}

/// The per-node engine: owns this node's server context, worker slots,
/// and the callback runner they share.
///
/// Tables must be created in the same order on every node (the usual
/// SPMD driver shape), which keeps table ids consistent cluster-wide
/// without coordination.
pub struct Engine {
    node: Node,
    nodes: Vec<Node>,
    config: EngineConfig,
    mailbox: Arc<Mailbox>,
    callback_runner: Arc<CallbackRunner>,
    state: State,
    next_table: TableId,
    tables: HashMap<TableId, TableMeta>,
    server: Option<ServerContext>,
    server_handle: Option<JoinHandle<Result<()>>>,
    dispatcher_handles: Vec<JoinHandle<()>>,
    request_counters: Vec<Arc<AtomicU32>>,
}

impl Engine {
    /// Create an engine for `node` in a cluster of `nodes`, speaking
    /// over `mailbox`.
    pub fn new(node: Node, nodes: Vec<Node>, mailbox: Arc<Mailbox>) -> Self {
        Self::with_config(node, nodes, mailbox, EngineConfig::default())
    }

    /// Create an engine with explicit configuration.
    pub fn with_config(
        node: Node,
        nodes: Vec<Node>,
        mailbox: Arc<Mailbox>,
        config: EngineConfig,
    ) -> Self {
        let servers: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        let request_counters = (0..config.workers_per_node)
            .map(|_| Arc::new(AtomicU32::new(0)))
            .collect();
        Self {
            server: Some(ServerContext::new(node.id, servers, Arc::clone(&mailbox))),
            node,
            nodes,
            config,
            mailbox,
            callback_runner: Arc::new(CallbackRunner::new()),
            state: State::Created,
            next_table: 0,
            tables: HashMap::new(),
            server_handle: None,
            dispatcher_handles: Vec::new(),
            request_counters,
        }
    }

    fn require_state(&self, expected: State) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Create a table; valid while Created or Running.
    ///
    /// Binds the storage kind, consistency model, and partition
    /// assignment for the table's whole lifetime. Dense tables are
    /// range-partitioned, sparse tables hash-partitioned, over the
    /// full server node list.
    pub fn create_table(
        &mut self,
        consistency: ConsistencyModel,
        storage: StorageKind,
    ) -> Result<TableId> {
        if self.state == State::Stopped {
            return Err(Error::InvalidState {
                expected: "created or running",
                actual: self.state.as_str(),
            });
        }

        let table = self.next_table;
        self.next_table += 1;
        let servers: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        let partition = Arc::new(match storage {
            StorageKind::Dense { capacity } => PartitionManager::range(table, capacity, servers),
            StorageKind::Sparse => PartitionManager::hash(table, servers),
        });
        self.tables.insert(
            table,
            TableMeta {
                storage,
                consistency,
                partition,
            },
        );

        match self.state {
            State::Created => {
                // Shard installed when the server context starts.
            }
            State::Running => {
                self.mailbox.send_message(
                    server_thread(self.node.id),
                    &Message::CreateTable {
                        table,
                        storage,
                        consistency,
                    },
                )?;
            }
            State::Stopped => unreachable!(),
        }
        info!(table, ?storage, ?consistency, "created table");
        Ok(table)
    }

    /// Start the server context and the worker response dispatchers.
    pub fn start_everything(&mut self) -> Result<()> {
        self.require_state(State::Created)?;

        // The worker pool must fit the fixed thread-id layout, or
        // worker ids would collide with the next node's server thread.
        let max_workers = (THREADS_PER_NODE - 1) as usize;
        if self.config.workers_per_node > max_workers {
            return Err(Error::InvalidWorkerCount {
                requested: self.config.workers_per_node,
                max: max_workers,
            });
        }

        let mut server = self.server.take().ok_or(Error::InvalidState {
            expected: "created",
            actual: "running",
        })?;
        for (&table, meta) in &self.tables {
            server.create_table(table, meta.storage, meta.consistency);
        }
        let server_rx = self.mailbox.register(server_thread(self.node.id));
        self.server_handle = Some(tokio::spawn(server.run(server_rx)));

        for slot in 0..self.config.workers_per_node {
            let thread = worker_thread(self.node.id, slot as u32);
            let mut rx = self.mailbox.register(thread);
            let runner = Arc::clone(&self.callback_runner);
            self.dispatcher_handles.push(tokio::spawn(async move {
                while let Some(bytes) = rx.recv().await {
                    match Message::decode(&bytes) {
                        Ok(Message::GetResponse {
                            request,
                            keys,
                            values,
                        }) => runner.on_sub_response(thread, request, keys, values),
                        Ok(Message::AddResponse { request }) => {
                            runner.on_sub_response(thread, request, Vec::new(), Vec::new())
                        }
                        Ok(other) => debug!(thread, ?other, "worker ignored message"),
                        Err(err) => error!(thread, %err, "undecodable message"),
                    }
                }
            }));
        }

        self.state = State::Running;
        info!(node = self.node.id, workers = self.config.workers_per_node, "engine running");
        Ok(())
    }

    /// Execute one task instance per locally allocated worker slot and
    /// wait for all of them.
    ///
    /// This is the synchronous barrier that orders sequential task
    /// phases even though Get/Add inside a phase are asynchronous.
    pub async fn run(&mut self, task: &MlTask) -> Result<()> {
        self.require_state(State::Running)?;
        let func = task
            .func()
            .ok_or_else(|| Error::TaskFailed("no lambda set".to_string()))?
            .clone();

        // Validate the whole allocation, not just the local share.
        for (&node, &count) in task.worker_alloc() {
            if !self.nodes.iter().any(|n| n.id == node) {
                return Err(Error::UnknownNode(node));
            }
            if count > self.config.workers_per_node {
                return Err(Error::WorkerPoolExceeded {
                    node,
                    requested: count,
                    pool: self.config.workers_per_node,
                });
            }
        }
        let mut partitions = HashMap::new();
        for &table in task.tables() {
            let meta = self.tables.get(&table).ok_or(Error::UnknownTable(table))?;
            partitions.insert(table, Arc::clone(&meta.partition));
        }
        let partitions = Arc::new(partitions);

        let local = task.worker_alloc().get(&self.node.id).copied().unwrap_or(0);
        debug!(node = self.node.id, instances = local, "running task");
        let mut handles = Vec::with_capacity(local);
        for slot in 0..local {
            let info = Info::new(
                worker_thread(self.node.id, slot as u32),
                Arc::clone(&self.mailbox),
                Arc::clone(&partitions),
                Arc::clone(&self.callback_runner),
                Arc::clone(&self.request_counters[slot]),
            );
            handles.push(tokio::spawn(func(info)));
        }
        for handle in handles {
            handle
                .await
                .map_err(|err| Error::TaskFailed(err.to_string()))?;
        }
        debug!(node = self.node.id, instances = local, "task instances completed");
        Ok(())
    }

    /// Stop the server context and dispatchers.
    ///
    /// Outstanding pending entries at shutdown are a fault, reported
    /// rather than silently discarded.
    pub async fn stop_everything(&mut self) -> Result<()> {
        self.require_state(State::Running)?;
        self.state = State::Stopped;

        self.mailbox
            .send_message(server_thread(self.node.id), &Message::Shutdown)?;
        let server_result = match self.server_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|err| Error::TaskFailed(err.to_string()))?,
            None => Ok(()),
        };

        // Closing the worker queues lets each dispatcher drain every
        // buffered response before exiting, so the pending check below
        // is deterministic.
        for slot in 0..self.config.workers_per_node {
            self.mailbox.deregister(worker_thread(self.node.id, slot as u32));
        }
        for handle in self.dispatcher_handles.drain(..) {
            handle
                .await
                .map_err(|err| Error::TaskFailed(err.to_string()))?;
        }
        self.mailbox.deregister(server_thread(self.node.id));

        server_result?;
        let pending = self.callback_runner.pending_count();
        if pending > 0 {
            error!(node = self.node.id, pending, "requests still pending at shutdown");
            return Err(Error::PendingAtShutdown(pending));
        }
        info!(node = self.node.id, "engine stopped");
        Ok(())
    }
}
