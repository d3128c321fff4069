//! User task description: what to run, where, and against which tables.

use crate::core::{NodeId, TableId};
use crate::worker::Info;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// The user function executed by each allocated worker instance.
pub type TaskFn = Arc<dyn Fn(Info) -> BoxFuture<'static, ()> + Send + Sync>;

/// A unit of user work.
///
/// Declares the tables it touches, how many worker instances to run on
/// which node, and the function body. The same task can be re-armed
/// with a new lambda between engine runs, which is how sequential
/// phases (evaluate, train, evaluate) are expressed.
#[derive(Clone, Default)]
pub struct MlTask {
    tables: Vec<TableId>,
    worker_alloc: HashMap<NodeId, usize>,
    func: Option<TaskFn>,
}

impl MlTask {
    /// Create an empty task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the tables this task's instances may open.
    pub fn set_tables(&mut self, tables: Vec<TableId>) {
        self.tables = tables;
    }

    /// Set the worker allocation: node id to instance count.
    pub fn set_worker_alloc(&mut self, alloc: HashMap<NodeId, usize>) {
        self.worker_alloc = alloc;
    }

    /// Set the function body each instance executes.
    pub fn set_lambda<F, Fut>(&mut self, func: F)
    where
        F: Fn(Info) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.func = Some(Arc::new(move |info| Box::pin(func(info))));
    }

    /// Declared table ids.
    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    /// Worker allocation map.
    pub fn worker_alloc(&self) -> &HashMap<NodeId, usize> {
        &self.worker_alloc
    }

    /// The function body, if set.
    pub fn func(&self) -> Option<&TaskFn> {
        self.func.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_configuration() {
        let mut task = MlTask::new();
        task.set_tables(vec![0, 1]);
        task.set_worker_alloc(HashMap::from([(0, 5), (1, 5)]));
        task.set_lambda(|_info| async {});

        assert_eq!(task.tables(), &[0, 1]);
        assert_eq!(task.worker_alloc()[&1], 5);
        assert!(task.func().is_some());
    }

    #[test]
    fn test_lambda_can_be_rearmed() {
        let mut task = MlTask::new();
        task.set_lambda(|_info| async {});
        let first = Arc::as_ptr(task.func().unwrap());
        task.set_lambda(|_info| async {});
        assert_ne!(first, Arc::as_ptr(task.func().unwrap()));
    }
}
