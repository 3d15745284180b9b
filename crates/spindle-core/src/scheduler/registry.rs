//! Task registry
//!
//! Maps handles to control blocks. The registry is the owner of record:
//! a task is inserted at spawn and removed when it dies. Lookups hand out
//! `Arc` clones, so a resume racing a removal still holds a valid block.

use crate::scheduler::{Task, TaskHandle, TaskStatus};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Registry {
    tasks: DashMap<TaskHandle, Arc<Task>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, task: Arc<Task>) {
        self.tasks.insert(task.handle(), task);
    }

    pub(crate) fn get(&self, handle: TaskHandle) -> Option<Arc<Task>> {
        self.tasks.get(&handle).map(|entry| entry.value().clone())
    }

    pub(crate) fn remove(&self, handle: TaskHandle) -> Option<Arc<Task>> {
        self.tasks.remove(&handle).map(|(_, task)| task)
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of registered tasks currently in `status`
    pub(crate) fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.value().status() == status)
            .count()
    }

    /// Remove and return every registered task
    pub(crate) fn drain(&self) -> Vec<Arc<Task>> {
        let handles: Vec<TaskHandle> = self.tasks.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }
}
