use super::vec2::Vec2;
use serde::{Deserialize, Serialize};

/// Sentinel group id for agents that belong to no group.
pub const UNGROUPED: i32 = -1;

/// Behavior selected by the steering pass for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentState {
    #[default]
    Idle,
    SeekingFood,
    SeekingMate,
    Flee,
    Wander,
}

impl AgentState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "Idle",
            AgentState::SeekingFood => "SeekingFood",
            AgentState::SeekingMate => "SeekingMate",
            AgentState::Flee => "Flee",
            AgentState::Wander => "Wander",
        }
    }
}

/// Bounded evolvable parameters. Each gene is clamped to a configured
/// range whenever it is sampled or mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentTraits {
    pub speed: f64,
    pub metabolism: f64,
    pub disease_resistance: f64,
    pub fertility: f64,
    pub sociality: f64,
    pub territoriality: f64,
    pub loyalty: f64,
    pub founder: f64,
    pub kin_bias: f64,
}

impl Default for AgentTraits {
    fn default() -> Self {
        Self {
            speed: 1.0,
            metabolism: 1.0,
            disease_resistance: 1.0,
            fertility: 1.0,
            sociality: 1.0,
            territoriality: 1.0,
            loyalty: 1.0,
            founder: 1.0,
            kin_bias: 1.0,
        }
    }
}

/// A single organism, exclusively owned by the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: u64,
    pub generation: u32,
    pub lineage_id: u64,
    pub group_id: i32,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Radians; only updated when velocity has non-trivial magnitude.
    pub heading: f64,
    pub energy: f64,
    pub age: f64,
    pub state: AgentState,
    pub alive: bool,
    pub stress: f64,
    pub group_lonely_seconds: f64,
    pub group_cooldown: f64,
    pub wander_dir: Vec2,
    pub wander_time: f64,
    /// Desired velocity from the last full steering pass, reused on
    /// strided ticks.
    pub last_desired: Vec2,
    pub last_sensed_danger: bool,
    pub traits: AgentTraits,
    pub traits_dirty: bool,
    pub appearance_h: f64,
    pub appearance_s: f64,
    pub appearance_l: f64,
}

impl Default for Agent {
    fn default() -> Self {
        Self {
            id: 0,
            generation: 0,
            lineage_id: 0,
            group_id: UNGROUPED,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            heading: 0.0,
            energy: 0.0,
            age: 0.0,
            state: AgentState::Idle,
            alive: true,
            stress: 0.0,
            group_lonely_seconds: 0.0,
            group_cooldown: 0.0,
            wander_dir: Vec2::ZERO,
            wander_time: 0.0,
            last_desired: Vec2::ZERO,
            last_sensed_danger: false,
            traits: AgentTraits::default(),
            traits_dirty: true,
            appearance_h: 50.0,
            appearance_s: 1.0,
            appearance_l: 0.83,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings_match_contract() {
        assert_eq!(AgentState::SeekingFood.as_str(), "SeekingFood");
        assert_eq!(AgentState::Flee.as_str(), "Flee");
        assert_eq!(AgentState::Wander.as_str(), "Wander");
    }

    #[test]
    fn test_default_agent_is_ungrouped_and_alive() {
        let agent = Agent::default();
        assert_eq!(agent.group_id, UNGROUPED);
        assert!(agent.alive);
        assert!(agent.traits_dirty);
    }
}
