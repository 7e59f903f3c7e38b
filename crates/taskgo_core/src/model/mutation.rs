//! Mutation events emitted by the collection owner.
//!
//! # Responsibility
//! - Describe which operation changed the collection and carry the resulting
//!   full snapshot.
//! - Define the observer contract consumed by the auto-save scheduler.

use crate::model::collection::TaskCollection;
use crate::model::task::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Operation tag carried through to storage audit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    /// Stable tag string used in logs and storage metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Rate-limit operation name for this mutation.
    pub fn operation_name(self) -> &'static str {
        match self {
            Self::Create => "create_task",
            Self::Update => "update_task",
            Self::Delete => "delete_task",
        }
    }
}

impl Display for MutationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed change to the task collection.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub task_id: TaskId,
    /// Full collection state after the mutation was applied.
    pub snapshot: Arc<TaskCollection>,
}

/// Observer notified synchronously after each committed mutation.
///
/// Implementations must not block; long work is expected to be scheduled.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent);
}
