//! Worker-side API: the per-worker context and the client table handle.

pub mod callback;
pub mod table;

pub use callback::{CallbackRunner, Completion};
pub use table::KvClientTable;

use crate::core::{Error, Result, TableId, ThreadId};
use crate::partition::PartitionManager;
use crate::transport::Mailbox;
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// Per-worker context handed to task code.
///
/// Carries everything a task needs to construct [`KvClientTable`]
/// instances: the worker's thread id, the outgoing mailbox, the
/// partition manager of every declared table, and the shared callback
/// runner. Lives for one task execution on one worker slot.
#[derive(Clone)]
pub struct Info {
    /// This worker's cluster-wide thread id.
    pub thread_id: ThreadId,
    mailbox: Arc<Mailbox>,
    partition_managers: Arc<HashMap<TableId, Arc<PartitionManager>>>,
    callback_runner: Arc<CallbackRunner>,
    next_request: Arc<AtomicU32>,
}

impl Info {
    /// `next_request` is the worker slot's persistent request counter:
    /// it outlives any single task so request ids never repeat while an
    /// earlier task's acks are still in flight.
    pub(crate) fn new(
        thread_id: ThreadId,
        mailbox: Arc<Mailbox>,
        partition_managers: Arc<HashMap<TableId, Arc<PartitionManager>>>,
        callback_runner: Arc<CallbackRunner>,
        next_request: Arc<AtomicU32>,
    ) -> Self {
        Self {
            thread_id,
            mailbox,
            partition_managers,
            callback_runner,
            next_request,
        }
    }

    /// Open a client handle on a declared table.
    ///
    /// An undeclared table id is a configuration fault.
    pub fn table(&self, table: TableId) -> Result<KvClientTable> {
        let partition = self
            .partition_managers
            .get(&table)
            .ok_or(Error::UnknownTable(table))?;
        Ok(KvClientTable::new(
            self.thread_id,
            table,
            Arc::clone(&self.mailbox),
            Arc::clone(partition),
            Arc::clone(&self.callback_runner),
            Arc::clone(&self.next_request),
        ))
    }
}
