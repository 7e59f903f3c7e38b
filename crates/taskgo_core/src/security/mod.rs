//! Admission control and threat detection for write operations.
//!
//! # Responsibility
//! - Rate-limit writes per operation name.
//! - Classify and collect injection signatures in request payloads.
//! - Define the audit event contract consumed by the logging collaborator.
//!
//! # Invariants
//! - A denied or invalid check short-circuits the caller before any mutation.

pub mod audit;
pub mod rate_limiter;
pub mod threat;
