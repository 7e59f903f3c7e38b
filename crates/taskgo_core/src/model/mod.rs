//! Domain model for the task persistence pipeline.
//!
//! # Responsibility
//! - Define the task record, the in-memory collection and mutation events.
//! - Keep the serialized snapshot shape in one place.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - A collection snapshot always contains whole tasks, never diffs.

pub mod collection;
pub mod mutation;
pub mod task;
