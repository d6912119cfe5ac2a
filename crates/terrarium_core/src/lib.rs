//! # Terrarium Core
//!
//! The core simulation engine of the terrarium - a fixed-timestep world in
//! which autonomous mobile agents forage on a regenerating food field, form
//! and dissolve social groups, breed under selection pressure, and die from
//! age, density, and disease.
//!
//! This crate contains the deterministic simulation logic, including:
//! - Steering composition (flee, forage, mate-seeking, flocking biases)
//! - The group membership state machine and group-base registry
//! - Lifecycle (metabolism, feeding, pair reproduction, mortality)
//! - Environment fields (food, pheromone, danger) with diffusion and decay
//! - Spatial indexing and per-tick scratch buffer reuse
//!
//! ## Architecture
//!
//! The simulation is single-threaded and cooperative: a tick is a pure
//! function of `(state, tick_index)`. All random draws go through four
//! seeded streams, so runs with the same seed and config reproduce
//! bit-identical metrics and snapshots.
//!
//! ## Example
//!
//! ```ignore
//! use terrarium_core::{config::SimulationConfig, world::World};
//!
//! let mut world = World::new(SimulationConfig::default())?;
//! let metrics = world.step(0);
//! let snapshot = world.snapshot(1);
//! ```

/// Configuration management for simulation parameters
pub mod config;
/// Environment fields (food, pheromone, danger) with diffusion and decay
pub mod environment;
/// Deterministic seeded random streams
pub mod rng;
/// Uniform-cell spatial index for neighbor queries
pub mod spatial_grid;
/// Core simulation systems (steering, groups, lifecycle, fields, metrics)
pub mod systems;
/// The world orchestrator driving the tick loop
pub mod world;

pub use config::SimulationConfig;
pub use terrarium_data::{
    Agent, AgentSnapshot, AgentState, AgentTraits, Snapshot, TickMetrics, Vec2, UNGROUPED,
};
pub use world::World;
