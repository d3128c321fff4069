//! Shard storage for server-side tables.

use crate::core::{Key, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage layout of a table, chosen at creation time.
///
/// Dense tables pair with range partitioning (the shard holds a
/// contiguous key interval); sparse tables pair with hash partitioning
/// and an unbounded key domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Contiguous vector over `[0, capacity)`, zero-initialized.
    Dense { capacity: Key },
    /// Mapping by key; unseen keys read as zero.
    Sparse,
}

/// The values a server node holds for one table shard.
///
/// Mutated only by the owning server context, so plain data suffices;
/// per-key atomicity of each addition follows from single-writer
/// ownership. No cross-key atomicity: a Get may observe a batch of
/// adds partially applied.
#[derive(Clone, Debug)]
pub enum Storage {
    /// Dense shard: contiguous interval starting at `base`.
    Dense { base: Key, values: Vec<Value> },
    /// Sparse shard: entries created on first touch.
    Sparse { values: HashMap<Key, Value> },
}

impl Storage {
    /// Build the shard for the key interval `[base, base + len)`.
    pub fn dense(base: Key, len: usize) -> Self {
        Self::Dense {
            base,
            values: vec![0.0; len],
        }
    }

    /// Build an empty sparse shard.
    pub fn sparse() -> Self {
        Self::Sparse {
            values: HashMap::new(),
        }
    }

    /// Accumulate `deltas` into the stored values, key-aligned.
    ///
    /// Keys must belong to this shard; the partition manager guarantees
    /// that on every well-formed request path.
    pub fn apply_add(&mut self, keys: &[Key], deltas: &[Value]) {
        debug_assert_eq!(keys.len(), deltas.len());
        match self {
            Self::Dense { base, values } => {
                for (&key, &delta) in keys.iter().zip(deltas) {
                    values[(key - *base) as usize] += delta;
                }
            }
            Self::Sparse { values } => {
                for (&key, &delta) in keys.iter().zip(deltas) {
                    *values.entry(key).or_insert(0.0) += delta;
                }
            }
        }
    }

    /// Read the current value for each key, in request order.
    pub fn apply_get(&self, keys: &[Key]) -> Vec<Value> {
        match self {
            Self::Dense { base, values } => {
                keys.iter().map(|&key| values[(key - *base) as usize]).collect()
            }
            Self::Sparse { values } => keys
                .iter()
                .map(|key| values.get(key).copied().unwrap_or(0.0))
                .collect(),
        }
    }

    /// Number of materialized entries in this shard.
    pub fn len(&self) -> usize {
        match self {
            Self::Dense { values, .. } => values.len(),
            Self::Sparse { values } => values.len(),
        }
    }

    /// Whether the shard holds no materialized entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_add_then_get() {
        let mut shard = Storage::dense(4, 4); // owns keys 4..8
        shard.apply_add(&[4, 6], &[1.5, -2.0]);
        shard.apply_add(&[4], &[0.5]);
        assert_eq!(shard.apply_get(&[4, 5, 6, 7]), vec![2.0, 0.0, -2.0, 0.0]);
    }

    #[test]
    fn test_sparse_zero_initialized() {
        let mut shard = Storage::sparse();
        assert_eq!(shard.apply_get(&[9000]), vec![0.0]);
        shard.apply_add(&[9000], &[3.25]);
        assert_eq!(shard.apply_get(&[9000]), vec![3.25]);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_sparse_accumulates() {
        let mut shard = Storage::sparse();
        for _ in 0..3 {
            shard.apply_add(&[0, 1], &[1.0, 1.0]);
        }
        assert_eq!(shard.apply_get(&[0, 1]), vec![3.0, 3.0]);
    }

    #[test]
    fn test_get_preserves_request_order() {
        let mut shard = Storage::sparse();
        shard.apply_add(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        assert_eq!(shard.apply_get(&[3, 1, 2]), vec![3.0, 1.0, 2.0]);
    }
}
