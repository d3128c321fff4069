//! Core types, errors, and logging shared by all ParaKV modules.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use types::{Key, Node, NodeId, RequestId, TableId, ThreadId, Value};
