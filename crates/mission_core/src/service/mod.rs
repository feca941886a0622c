//! Use-case services over the availability engine.
//!
//! # Responsibility
//! - Gate entry points on caller capabilities.
//! - Own transaction scope and per-call logging.
//! - Keep hosts decoupled from repository and rule details.

pub mod definition_service;
pub mod mission_service;
