//! Attribute scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: AttributeScheduler struct, constructor, registration, accessors
//! - `ordering`: dependency validation and topological metric order
//! - `execution`: the per-metric, per-entity date walk

mod core;
mod execution;
mod ordering;
#[cfg(test)]
mod tests;

pub use self::core::AttributeScheduler;
