//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate validation, admission and mutation into use-case APIs.
//! - Keep callers decoupled from storage and scheduling details.

pub mod task_service;
