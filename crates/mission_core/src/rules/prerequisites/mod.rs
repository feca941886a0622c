//! Built-in prerequisite variants.

pub mod complete_dependent;
pub mod exclusion;
pub mod quota;
