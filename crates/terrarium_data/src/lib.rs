//! Pure data structures for the terrarium simulation.
//!
//! This crate contains serializable data types with no business logic,
//! shared between the simulation engine and external drivers.

pub mod data;

pub use data::agent::*;
pub use data::metrics::*;
pub use data::snapshot::*;
pub use data::vec2::*;
