//! In-memory task collection.
//!
//! # Responsibility
//! - Hold tasks keyed by id for the owning service.
//! - Define the serialized snapshot shape (JSON array ordered by id).
//!
//! # Invariants
//! - Ids are unique; deserializing a snapshot with duplicate ids fails.

use crate::model::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Snapshot decode error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    DuplicateId(TaskId),
}

impl Display for CollectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "duplicate task id in snapshot: {id}"),
        }
    }
}

impl Error for CollectionError {}

/// Set of tasks keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Task>", try_from = "Vec<Task>")]
pub struct TaskCollection {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Inserts or replaces one task, returning the previous value.
    pub fn insert(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id(), task)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    /// Iterates tasks in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }
}

impl From<TaskCollection> for Vec<Task> {
    fn from(value: TaskCollection) -> Self {
        value.tasks.into_values().collect()
    }
}

impl TryFrom<Vec<Task>> for TaskCollection {
    type Error = CollectionError;

    fn try_from(tasks: Vec<Task>) -> Result<Self, Self::Error> {
        let mut collection = Self::new();
        for task in tasks {
            let id = task.id();
            if collection.insert(task).is_some() {
                return Err(CollectionError::DuplicateId(id));
            }
        }
        Ok(collection)
    }
}

impl FromIterator<Task> for TaskCollection {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut collection = Self::new();
        for task in iter {
            collection.insert(task);
        }
        collection
    }
}
