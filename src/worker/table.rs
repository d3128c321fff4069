//! Client-side table handle used inside task code.
//!
//! Translates logical Get/Add calls into per-partition messages. Get
//! suspends the caller until every partition has answered and returns
//! values in input key order; Add is fire-and-forget, its acks tracked
//! by the callback runner for bookkeeping only.

use crate::core::types::server_thread;
use crate::core::{Error, Key, RequestId, Result, TableId, ThreadId, Value};
use crate::partition::PartitionManager;
use crate::transport::{Mailbox, Message};
use crate::worker::callback::{CallbackRunner, Completion};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Worker-facing handle on one table.
pub struct KvClientTable {
    thread: ThreadId,
    table: TableId,
    mailbox: Arc<Mailbox>,
    partition: Arc<PartitionManager>,
    callbacks: Arc<CallbackRunner>,
    next_request: Arc<AtomicU32>,
}

impl KvClientTable {
    pub(crate) fn new(
        thread: ThreadId,
        table: TableId,
        mailbox: Arc<Mailbox>,
        partition: Arc<PartitionManager>,
        callbacks: Arc<CallbackRunner>,
        next_request: Arc<AtomicU32>,
    ) -> Self {
        Self {
            thread,
            table,
            mailbox,
            partition,
            callbacks,
            next_request,
        }
    }

    fn next_request_id(&self) -> RequestId {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Read the current values of `keys`.
    ///
    /// `keys` must be ordered and duplicate-free. Suspends until every
    /// touched partition has answered; the merged values come back in
    /// input key order regardless of network arrival order. The pending
    /// entry is registered before anything is sent, so a reply can
    /// never beat its own bookkeeping.
    pub async fn get(&self, keys: &[Key]) -> Result<Vec<Value>> {
        debug_assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys must be ordered and unique");
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let split = self.partition.resolve(keys)?;
        let request = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.callbacks
            .register(self.thread, request, split.len(), Completion::Get(tx));
        debug!(
            table = self.table,
            thread = self.thread,
            request,
            partitions = split.len(),
            "dispatching get"
        );

        for (node, indices) in &split {
            let sub_keys: Vec<Key> = indices.iter().map(|&i| keys[i]).collect();
            let sent = self.mailbox.send_message(
                server_thread(*node),
                &Message::GetRequest {
                    table: self.table,
                    from: self.thread,
                    request,
                    keys: sub_keys,
                },
            );
            if let Err(err) = sent {
                // The request never fully went out; evict the entry so
                // it cannot surface as a phantom pending fault later.
                self.callbacks.discard(self.thread, request);
                return Err(err);
            }
        }

        let merged = rx.await.map_err(|_| Error::ChannelClosed(self.thread))?;
        debug_assert_eq!(merged.len(), keys.len());
        Ok(merged.into_iter().map(|(_, value)| value).collect())
    }

    /// Accumulate `deltas` into `keys`, key-aligned.
    ///
    /// Fire-and-forget: returns as soon as the sub-requests are sent.
    /// A length mismatch is a configuration fault, raised before any
    /// dispatch.
    pub fn add(&self, keys: &[Key], deltas: &[Value]) -> Result<()> {
        if keys.len() != deltas.len() {
            return Err(Error::LengthMismatch {
                keys: keys.len(),
                deltas: deltas.len(),
            });
        }
        if keys.is_empty() {
            return Ok(());
        }

        let split = self.partition.resolve(keys)?;
        let request = self.next_request_id();
        self.callbacks
            .register(self.thread, request, split.len(), Completion::Ack);
        debug!(
            table = self.table,
            thread = self.thread,
            request,
            partitions = split.len(),
            "dispatching add"
        );

        for (node, indices) in &split {
            let sub_keys: Vec<Key> = indices.iter().map(|&i| keys[i]).collect();
            let sub_deltas: Vec<Value> = indices.iter().map(|&i| deltas[i]).collect();
            let sent = self.mailbox.send_message(
                server_thread(*node),
                &Message::AddRequest {
                    table: self.table,
                    from: self.thread,
                    request,
                    keys: sub_keys,
                    deltas: sub_deltas,
                },
            );
            if let Err(err) = sent {
                self.callbacks.discard(self.thread, request);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Announce that this worker finished one logical iteration.
    ///
    /// Advances the staleness clocks on every server holding a shard of
    /// this table. A no-op for ASP tables beyond the message hop.
    pub fn clock(&self) -> Result<()> {
        for &node in self.partition.servers() {
            self.mailbox.send_message(
                server_thread(node),
                &Message::Clock {
                    table: self.table,
                    from: self.thread,
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_table(partition: PartitionManager) -> (KvClientTable, Arc<Mailbox>, Arc<CallbackRunner>) {
        let mailbox = Arc::new(Mailbox::new());
        let callbacks = Arc::new(CallbackRunner::new());
        let table = KvClientTable::new(
            1,
            0,
            Arc::clone(&mailbox),
            Arc::new(partition),
            Arc::clone(&callbacks),
            Arc::new(AtomicU32::new(0)),
        );
        (table, mailbox, callbacks)
    }

    #[tokio::test]
    async fn test_get_dispatches_one_sub_request_per_node() {
        let (table, mailbox, callbacks) = test_table(PartitionManager::hash(0, vec![0, 1]));
        let mut rx0 = mailbox.register(server_thread(0));
        let mut rx1 = mailbox.register(server_thread(1));

        let get = table.get(&[0, 1, 2, 3]);
        tokio::pin!(get);
        // Drive the get future until its sub-requests are out; it can't
        // finish because nobody has answered yet.
        assert!(futures::poll!(&mut get).is_pending());

        let sub0 = Message::decode(&rx0.try_recv().unwrap()).unwrap();
        let sub1 = Message::decode(&rx1.try_recv().unwrap()).unwrap();
        assert!(rx0.try_recv().is_err(), "more than one sub-request per node");
        assert!(rx1.try_recv().is_err(), "more than one sub-request per node");

        match (sub0, sub1) {
            (
                Message::GetRequest { keys: even, .. },
                Message::GetRequest { keys: odd, .. },
            ) => {
                assert_eq!(even, vec![0, 2]);
                assert_eq!(odd, vec![1, 3]);
            }
            other => panic!("unexpected messages: {other:?}"),
        }

        // Answer out of order: odd partition first.
        callbacks.on_sub_response(1, 0, vec![1, 3], vec![10.0, 30.0]);
        callbacks.on_sub_response(1, 0, vec![0, 2], vec![0.0, 20.0]);

        assert_eq!(get.await.unwrap(), vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[tokio::test]
    async fn test_add_length_mismatch_rejected_before_dispatch() {
        let (table, mailbox, callbacks) = test_table(PartitionManager::hash(0, vec![0]));
        let mut rx = mailbox.register(server_thread(0));

        let err = table.add(&[5, 7], &[1.0]).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { keys: 2, deltas: 1 }));
        assert!(rx.try_recv().is_err(), "sub-request sent despite fault");
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_add_does_not_block() {
        let (table, mailbox, callbacks) = test_table(PartitionManager::hash(0, vec![0]));
        let mut rx = mailbox.register(server_thread(0));

        // Nobody is serving, yet add returns immediately.
        table.add(&[2, 4], &[0.5, 0.5]).unwrap();
        assert!(matches!(
            Message::decode(&rx.try_recv().unwrap()).unwrap(),
            Message::AddRequest { .. }
        ));
        // The ack is still tracked for bookkeeping.
        assert_eq!(callbacks.pending_count(), 1);
        callbacks.on_sub_response(1, 0, vec![], vec![]);
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_get_dispatch_leaves_no_pending_entry() {
        // Node 1's server queue is missing, so the second sub-request
        // fails to send; the entry must not linger as phantom pending.
        let (table, mailbox, callbacks) = test_table(PartitionManager::hash(0, vec![0, 1]));
        let _rx0 = mailbox.register(server_thread(0));

        let err = table.get(&[0, 1]).await.unwrap_err();
        assert!(matches!(err, Error::UnknownThread(t) if t == server_thread(1)));
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_add_dispatch_leaves_no_pending_entry() {
        let (table, mailbox, callbacks) = test_table(PartitionManager::hash(0, vec![0, 1]));
        let _rx0 = mailbox.register(server_thread(0));

        let err = table.add(&[0, 1], &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, Error::UnknownThread(t) if t == server_thread(1)));
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_get_empty_keys() {
        let (table, _mailbox, _callbacks) = test_table(PartitionManager::hash(0, vec![0]));
        assert_eq!(table.get(&[]).await.unwrap(), Vec::<Value>::new());
    }

    #[tokio::test]
    async fn test_get_out_of_range_key_is_fault() {
        let (table, _mailbox, callbacks) = test_table(PartitionManager::range(0, 4, vec![0]));
        let err = table.get(&[2, 9]).await.unwrap_err();
        assert!(matches!(err, Error::KeyOutOfRange { key: 9, .. }));
        assert_eq!(callbacks.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_clock_reaches_every_server() {
        let (table, mailbox, _callbacks) = test_table(PartitionManager::hash(0, vec![0, 1]));
        let mut rx0 = mailbox.register(server_thread(0));
        let mut rx1 = mailbox.register(server_thread(1));

        table.clock().unwrap();
        for rx in [&mut rx0, &mut rx1] {
            assert!(matches!(
                Message::decode(&rx.try_recv().unwrap()).unwrap(),
                Message::Clock { table: 0, from: 1 }
            ));
        }
    }

    #[test]
    fn test_unknown_table_is_fault() {
        let info = crate::worker::Info::new(
            1,
            Arc::new(Mailbox::new()),
            Arc::new(HashMap::new()),
            Arc::new(CallbackRunner::new()),
            Arc::new(AtomicU32::new(0)),
        );
        assert!(matches!(info.table(9), Err(Error::UnknownTable(9))));
    }
}
