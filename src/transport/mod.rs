//! Message types and the in-process mailbox.
//!
//! The engine core serializes and deserializes its own messages; the
//! transport only moves opaque bytes between named execution contexts.
//! [`Mailbox`] is the reference transport: a queue map keyed by thread
//! id, which also lets tests run a whole multi-node cluster inside one
//! process by sharing a single mailbox between engines.

use crate::core::{Error, Key, RequestId, Result, TableId, ThreadId, Value};
use crate::server::consistency::ConsistencyModel;
use crate::server::storage::StorageKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Wire messages exchanged between worker and server contexts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// Read request for a per-partition key subset.
    GetRequest {
        table: TableId,
        from: ThreadId,
        request: RequestId,
        keys: Vec<Key>,
    },
    /// Per-partition answer to a `GetRequest`. Keys are echoed so the
    /// requester can merge partitions by key order.
    GetResponse {
        request: RequestId,
        keys: Vec<Key>,
        values: Vec<Value>,
    },
    /// Accumulate request for a per-partition key subset.
    AddRequest {
        table: TableId,
        from: ThreadId,
        request: RequestId,
        keys: Vec<Key>,
        deltas: Vec<Value>,
    },
    /// Acknowledgment of an `AddRequest`.
    AddResponse { request: RequestId },
    /// Worker progress signal for staleness tracking.
    Clock { table: TableId, from: ThreadId },
    /// Control: install a new shard table on a running server.
    CreateTable {
        table: TableId,
        storage: StorageKind,
        consistency: ConsistencyModel,
    },
    /// Control: drain and stop the server context.
    Shutdown,
}

impl Message {
    /// Encode to the byte payload handed to the transport.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a payload received from the transport.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// In-process byte transport between named execution contexts.
///
/// Ordered, reliable delivery per sender-receiver pair, matching the
/// contract the core requires from a real socket transport.
#[derive(Default)]
pub struct Mailbox {
    queues: RwLock<HashMap<ThreadId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receive queue for `thread` and return its consumer end.
    ///
    /// Re-registering a thread id replaces the previous queue.
    pub fn register(&self, thread: ThreadId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues
            .write()
            .expect("mailbox lock poisoned")
            .insert(thread, tx);
        rx
    }

    /// Remove the queue for `thread`, closing its receiver.
    pub fn deregister(&self, thread: ThreadId) {
        self.queues
            .write()
            .expect("mailbox lock poisoned")
            .remove(&thread);
    }

    /// Deliver `bytes` to the queue registered for `to`.
    pub fn send(&self, to: ThreadId, bytes: Vec<u8>) -> Result<()> {
        let queues = self.queues.read().expect("mailbox lock poisoned");
        let tx = queues.get(&to).ok_or(Error::UnknownThread(to))?;
        tx.send(bytes).map_err(|_| Error::ChannelClosed(to))
    }

    /// Encode and deliver a message in one step.
    pub fn send_message(&self, to: ThreadId, message: &Message) -> Result<()> {
        self.send(to, message.encode()?)
    }
}
