//! The integrators provided by this crate.

pub mod flat;
pub mod vegas;
