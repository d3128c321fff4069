//! Consistency models governing when an Add becomes visible to a Get.
//!
//! The set of models is closed and chosen per table at creation time.
//! ASP applies and reads immediately with no cross-worker ordering.
//! SSP bounds how far a worker's view may run ahead of the slowest
//! worker: a Get from a worker more than `staleness` clocks ahead is
//! buffered until the slowest worker catches up, never rejected.

use crate::core::{Key, RequestId, ThreadId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The rule a table uses to order Adds against Gets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyModel {
    /// Asynchronous Parallel: apply immediately, read current state.
    Asp,
    /// Staleness-Synchronous Parallel with the given clock bound.
    Ssp { staleness: u32 },
}

/// A Get held back by the staleness bound, replayed once admissible.
#[derive(Clone, Debug)]
pub struct DeferredGet {
    pub from: ThreadId,
    pub request: RequestId,
    pub keys: Vec<Key>,
    /// Minimum cluster clock at which this Get may be served.
    min_clock: u32,
}

/// Per-shard progress tracker for SSP tables.
///
/// Workers announce progress with `Clock` messages; the tracker knows
/// each worker's logical clock and defers Gets from workers running
/// more than `staleness` clocks ahead of the slowest one.
#[derive(Debug)]
pub struct SspTracker {
    staleness: u32,
    clocks: HashMap<ThreadId, u32>,
    deferred: Vec<DeferredGet>,
}

impl SspTracker {
    /// Create a tracker with the given staleness bound.
    pub fn new(staleness: u32) -> Self {
        Self {
            staleness,
            clocks: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    fn min_clock(&self) -> u32 {
        self.clocks.values().copied().min().unwrap_or(0)
    }

    /// Whether a Get from `from` may be served right now.
    ///
    /// First contact registers the worker at clock 0, so a cluster
    /// where nobody has clocked yet serves everything.
    pub fn admits(&mut self, from: ThreadId) -> bool {
        let clock = *self.clocks.entry(from).or_insert(0);
        clock <= self.min_clock() + self.staleness
    }

    /// Hold back a Get until the slowest worker catches up.
    pub fn defer(&mut self, from: ThreadId, request: RequestId, keys: Vec<Key>) {
        let clock = *self.clocks.entry(from).or_insert(0);
        self.deferred.push(DeferredGet {
            from,
            request,
            keys,
            min_clock: clock.saturating_sub(self.staleness),
        });
    }

    /// Advance `from`'s clock; returns deferred Gets now admissible.
    pub fn advance(&mut self, from: ThreadId) -> Vec<DeferredGet> {
        *self.clocks.entry(from).or_insert(0) += 1;
        let min = self.min_clock();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|get| get.min_clock <= min);
        self.deferred = waiting;
        ready
    }

    /// Number of Gets still held back.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }
}

/// Runtime policy state attached to one shard table.
#[derive(Debug)]
pub enum PolicyState {
    Asp,
    Ssp(SspTracker),
}

impl PolicyState {
    /// Instantiate the state for a model.
    pub fn new(model: ConsistencyModel) -> Self {
        match model {
            ConsistencyModel::Asp => Self::Asp,
            ConsistencyModel::Ssp { staleness } => Self::Ssp(SspTracker::new(staleness)),
        }
    }
}
