//! # ParaKV - Distributed Parameter Server Engine
//!
//! A cluster of nodes jointly holds sharded key-value tables of numeric
//! model parameters; concurrent worker tasks read (`get`) and
//! accumulate updates (`add`) under a selectable consistency model:
//! - **ASP**: apply immediately, read current state, no cross-worker
//!   ordering
//! - **SSP**: bound each worker's staleness against the slowest worker
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parakv::engine::{Engine, MlTask};
//! use parakv::server::consistency::ConsistencyModel;
//! use parakv::server::storage::StorageKind;
//! use parakv::transport::Mailbox;
//! use parakv::core::Node;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> parakv::Result<()> {
//!     let node = Node::new(0, "localhost", 23847);
//!     let mut engine = Engine::new(node.clone(), vec![node], Arc::new(Mailbox::new()));
//!     let table = engine.create_table(ConsistencyModel::Asp, StorageKind::Sparse)?;
//!     engine.start_everything()?;
//!
//!     let mut task = MlTask::new();
//!     task.set_tables(vec![table]);
//!     task.set_worker_alloc(HashMap::from([(0, 2)]));
//!     task.set_lambda(move |info| async move {
//!         let kv = info.table(table).unwrap();
//!         kv.add(&[0, 1], &[0.5, -0.5]).unwrap();
//!         let _vals = kv.get(&[0, 1]).await.unwrap();
//!     });
//!     engine.run(&task).await?;
//!     engine.stop_everything().await
//! }
//! ```

pub mod core;
pub mod engine;
pub mod partition;
pub mod server;
pub mod transport;
pub mod worker;

pub use crate::core::error::{Error, Result};
