//! Completion variants contributed by host collaborators.
//!
//! These are not part of the built-in registry; hosts register them next to
//! the collaborator they depend on.

pub mod points;
