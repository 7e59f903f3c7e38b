//! Input validation and sanitization engine.
//!
//! # Responsibility
//! - Gate every untrusted string before it enters the task collection.
//! - Provide a display-side sanitizer that works without a browser DOM.
//!
//! # Invariants
//! - Encoded payloads are decoded before any pattern check.
//! - Validation is pure: no logging, no shared state.

pub mod entities;
pub mod sanitize;
