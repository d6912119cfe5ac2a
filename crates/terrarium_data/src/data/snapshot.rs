use super::metrics::TickMetrics;
use serde::{Deserialize, Serialize};

/// Per-agent payload streamed to the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub group: i32,
    pub behavior_state: String,
    /// "end" when the agent died this tick, "loop" otherwise.
    pub phase: String,
    pub age: f64,
    pub energy: f64,
    /// Derived from maturity and energy, clamped to [0.1, 1.0].
    pub size: f64,
    pub is_alive: bool,
    pub speed: f64,
    pub heading: f64,
    pub lineage_id: u64,
    pub generation: u32,
    pub trait_speed: f64,
    pub appearance_seed: u64,
    pub appearance_h: f64,
    pub appearance_s: f64,
    pub appearance_l: f64,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodCellSnapshot {
    pub x: i32,
    pub y: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneCellSnapshot {
    pub x: i32,
    pub y: i32,
    pub value: f64,
    pub group: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodFieldSnapshot {
    pub cells: Vec<FoodCellSnapshot>,
    pub resolution: i32,
    pub cell_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PheromoneFieldSnapshot {
    /// At most one (strongest) group per cell.
    pub cells: Vec<PheromoneCellSnapshot>,
    pub resolution: i32,
    pub cell_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFields {
    pub food: FoodFieldSnapshot,
    pub pheromones: PheromoneFieldSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotWorld {
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub world_size: f64,
    pub sim_dt: f64,
    /// 1 / sim_dt, or 0 when the time step is not positive.
    pub tick_rate: f64,
    pub seed: u64,
    pub config_version: String,
}

/// Full world state payload consumed by the external visualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub metrics: TickMetrics,
    pub agents: Vec<AgentSnapshot>,
    pub world: SnapshotWorld,
    pub metadata: SnapshotMetadata,
    pub fields: SnapshotFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_json_round_trip() {
        let snapshot = Snapshot {
            tick: 7,
            metrics: TickMetrics {
                tick: 7,
                population: 1,
                births: 0,
                deaths: 0,
                average_energy: 9.5,
                average_age: 3.25,
                groups: 1,
                neighbor_checks: 2,
                ungrouped: 0,
                tick_duration_ms: 0.4,
            },
            agents: vec![AgentSnapshot {
                id: 11,
                x: 1.5,
                y: 2.5,
                vx: 0.25,
                vy: -0.5,
                group: 3,
                behavior_state: "Wander".to_string(),
                phase: "loop".to_string(),
                age: 3.25,
                energy: 9.5,
                size: 0.62,
                is_alive: true,
                speed: 0.559,
                heading: -1.107,
                lineage_id: 4,
                generation: 2,
                trait_speed: 1.1,
                appearance_seed: 11,
                appearance_h: 50.0,
                appearance_s: 1.0,
                appearance_l: 0.83,
                importance: 1.0,
            }],
            world: SnapshotWorld { size: 100.0 },
            metadata: SnapshotMetadata {
                world_size: 100.0,
                sim_dt: 0.02,
                tick_rate: 50.0,
                seed: 1337,
                config_version: "v1".to_string(),
            },
            fields: SnapshotFields {
                food: FoodFieldSnapshot {
                    cells: vec![FoodCellSnapshot {
                        x: 0,
                        y: 1,
                        value: 8.0,
                    }],
                    resolution: 40,
                    cell_size: 2.5,
                },
                pheromones: PheromoneFieldSnapshot {
                    cells: vec![PheromoneCellSnapshot {
                        x: 2,
                        y: 2,
                        value: 4.0,
                        group: 3,
                    }],
                    resolution: 40,
                    cell_size: 2.5,
                },
            },
        };

        let json = serde_json::to_string(&snapshot).expect("serialize");
        let parsed: Snapshot = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, snapshot);
    }
}
