//! Completion tracking for in-flight distributed requests.
//!
//! One logical Get/Add fans out into a sub-request per touched
//! partition; the runner counts the per-partition responses and fires
//! the completion action exactly once when the last one lands. The
//! pending map is the only structure both the dispatching worker and
//! the transport receive paths touch concurrently, so it is guarded by
//! sharded locks keyed on request id rather than one global lock.

use crate::core::{Key, RequestId, ThreadId, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::{trace, warn};

const SHARD_COUNT: usize = 16;

/// What to do once every sub-response has arrived.
pub enum Completion {
    /// Wake the blocked Get caller with the merged key/value pairs,
    /// sorted by key.
    Get(oneshot::Sender<Vec<(Key, Value)>>),
    /// Add bookkeeping only; nobody is blocked.
    Ack,
}

struct PendingEntry {
    expected: usize,
    received: usize,
    partials: Vec<(Vec<Key>, Vec<Value>)>,
    completion: Completion,
}

/// Tracks pending entries for every in-flight request of one engine.
pub struct CallbackRunner {
    shards: Vec<Mutex<HashMap<(ThreadId, RequestId), PendingEntry>>>,
}

impl CallbackRunner {
    /// Create a runner with empty shards.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, request: RequestId) -> &Mutex<HashMap<(ThreadId, RequestId), PendingEntry>> {
        &self.shards[request as usize % SHARD_COUNT]
    }

    /// Create the pending entry for a request about to be dispatched.
    ///
    /// Must be called before the first sub-request is sent, so a fast
    /// reply can never race entry creation.
    pub fn register(
        &self,
        owner: ThreadId,
        request: RequestId,
        expected: usize,
        completion: Completion,
    ) {
        let mut shard = self.shard(request).lock().expect("callback lock poisoned");
        let replaced = shard.insert(
            (owner, request),
            PendingEntry {
                expected,
                received: 0,
                partials: Vec::with_capacity(expected),
                completion,
            },
        );
        debug_assert!(replaced.is_none(), "request id reused while pending");
    }

    /// Record one per-partition response.
    ///
    /// When the count reaches the expected number the entry is removed
    /// and its completion fires, exactly once, outside the lock.
    pub fn on_sub_response(
        &self,
        owner: ThreadId,
        request: RequestId,
        keys: Vec<Key>,
        values: Vec<Value>,
    ) {
        let completed = {
            let mut shard = self.shard(request).lock().expect("callback lock poisoned");
            let Some(entry) = shard.get_mut(&(owner, request)) else {
                warn!(owner, request, "sub-response for unknown request");
                return;
            };
            entry.partials.push((keys, values));
            entry.received += 1;
            if entry.received == entry.expected {
                shard.remove(&(owner, request))
            } else {
                None
            }
        };

        if let Some(entry) = completed {
            match entry.completion {
                Completion::Get(tx) => {
                    let mut merged: Vec<(Key, Value)> = entry
                        .partials
                        .into_iter()
                        .flat_map(|(keys, values)| keys.into_iter().zip(values))
                        .collect();
                    merged.sort_unstable_by_key(|&(key, _)| key);
                    // Caller may have given up waiting; nothing to do then
                    let _ = tx.send(merged);
                }
                Completion::Ack => {
                    trace!(owner, request, "add acknowledged by all partitions");
                }
            }
        }
    }

    /// Discard the pending entry of a request whose dispatch failed.
    ///
    /// The caller has already observed the send error, so nothing is
    /// in flight from its point of view; removing the entry keeps the
    /// pending map honest for the shutdown audit. Dropping a Get's
    /// oneshot sender here makes any straggler response from an
    /// already-dispatched partition a harmless no-op.
    pub fn discard(&self, owner: ThreadId, request: RequestId) {
        self.shard(request)
            .lock()
            .expect("callback lock poisoned")
            .remove(&(owner, request));
    }

    /// Number of requests still awaiting responses.
    pub fn pending_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("callback lock poisoned").len())
            .sum()
    }
}

impl Default for CallbackRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_after_last_arrival() {
        let runner = CallbackRunner::new();
        let (tx, mut rx) = oneshot::channel();
        runner.register(1, 0, 3, Completion::Get(tx));

        runner.on_sub_response(1, 0, vec![0], vec![1.0]);
        assert!(rx.try_recv().is_err(), "fired before all arrivals");
        runner.on_sub_response(1, 0, vec![1], vec![2.0]);
        assert!(rx.try_recv().is_err(), "fired before all arrivals");
        runner.on_sub_response(1, 0, vec![2], vec![3.0]);

        let merged = rx.await.unwrap();
        assert_eq!(merged, vec![(0, 1.0), (1, 2.0), (2, 3.0)]);
        assert_eq!(runner.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_merge_sorted_by_key_any_arrival_order() {
        // Partition replies arrive in every permutation; the merged
        // result must always come back in key order.
        let partials: [(Vec<Key>, Vec<Value>); 3] =
            [(vec![4, 5], vec![4.0, 5.0]), (vec![0, 2], vec![0.0, 2.0]), (vec![1, 3], vec![1.0, 3.0])];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let runner = CallbackRunner::new();
            let (tx, rx) = oneshot::channel();
            runner.register(7, 3, 3, Completion::Get(tx));
            for idx in order {
                let (keys, values) = partials[idx].clone();
                runner.on_sub_response(7, 3, keys, values);
            }
            let merged = rx.await.unwrap();
            let keys: Vec<Key> = merged.iter().map(|&(k, _)| k).collect();
            assert_eq!(keys, vec![0, 1, 2, 3, 4, 5]);
        }
    }

    #[tokio::test]
    async fn test_ack_entries_are_cleared() {
        let runner = CallbackRunner::new();
        runner.register(1, 0, 2, Completion::Ack);
        assert_eq!(runner.pending_count(), 1);

        runner.on_sub_response(1, 0, vec![], vec![]);
        assert_eq!(runner.pending_count(), 1);
        runner.on_sub_response(1, 0, vec![], vec![]);
        assert_eq!(runner.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_entry_and_ignores_stragglers() {
        let runner = CallbackRunner::new();
        let (tx, mut rx) = oneshot::channel();
        runner.register(1, 0, 2, Completion::Get(tx));
        runner.on_sub_response(1, 0, vec![0], vec![1.0]);

        runner.discard(1, 0);
        assert_eq!(runner.pending_count(), 0);

        // A response arriving after the discard is a no-op
        runner.on_sub_response(1, 0, vec![1], vec![2.0]);
        assert_eq!(runner.pending_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_request_id_from_different_workers() {
        // Request ids are only unique per originating thread; entries
        // from different workers must not collide.
        let runner = CallbackRunner::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        runner.register(1, 0, 1, Completion::Get(tx_a));
        runner.register(2, 0, 1, Completion::Get(tx_b));

        runner.on_sub_response(2, 0, vec![5], vec![5.0]);
        runner.on_sub_response(1, 0, vec![9], vec![9.0]);

        assert_eq!(rx_a.await.unwrap(), vec![(9, 9.0)]);
        assert_eq!(rx_b.await.unwrap(), vec![(5, 5.0)]);
    }

    #[tokio::test]
    async fn test_concurrent_sub_responses() {
        use std::sync::Arc;

        let runner = Arc::new(CallbackRunner::new());
        let expected = 32usize;
        let (tx, rx) = oneshot::channel();
        runner.register(1, 0, expected, Completion::Get(tx));

        let mut handles = Vec::new();
        for i in 0..expected {
            let runner = Arc::clone(&runner);
            handles.push(tokio::spawn(async move {
                runner.on_sub_response(1, 0, vec![i as Key], vec![i as Value]);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let merged = rx.await.unwrap();
        assert_eq!(merged.len(), expected);
        assert_eq!(runner.pending_count(), 0);
    }
}
