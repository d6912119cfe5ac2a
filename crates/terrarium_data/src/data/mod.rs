pub mod agent;
pub mod metrics;
pub mod snapshot;
pub mod vec2;
