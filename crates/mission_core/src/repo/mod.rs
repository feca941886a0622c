//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for missions and completion records.
//! - Isolate SQLite query details from engine orchestration.
//!
//! # Invariants
//! - Soft-deleted missions are invisible to every read.
//! - Repository APIs return semantic errors (`MissionNotFound`,
//!   `CompleteNotFound`) in addition to DB transport errors.

pub mod mission_repo;
