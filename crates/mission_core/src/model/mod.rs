//! Domain model for mission definitions and completion records.
//!
//! # Responsibility
//! - Define canonical data structures used by the availability checker and
//!   the completion executor.
//!
//! # Invariants
//! - Live mission fields are derived per check pass and never stored.
//! - Completion records are never physically deleted.

pub mod complete;
pub mod mission;
