//! Field event accumulation and the environment sub-tick.
//!
//! Per-tick events (food drops on death, danger pulses on flee, pheromone
//! deposits on birth) are accumulated in keyed buffers and flushed into
//! the environment after the per-agent pass. The environment itself
//! advances on its own cadence: the world accumulates simulation time and
//! drains it in `env_dt` chunks.

use crate::config::EnvironmentConfig;
use crate::environment::{CellKey, EnvironmentGrid};
use crate::rng::DeterministicRng;
use crate::world::World;
use terrarium_data::Vec2;

/// Climate noise state: a slowly varying multiplier applied to food
/// regeneration, driven by the dedicated climate RNG stream.
#[derive(Debug, Clone)]
pub(crate) struct ClimateNoise {
    pub multiplier: f64,
    pub target: f64,
    pub time_to_next_sample: f64,
}

impl Default for ClimateNoise {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            target: 1.0,
            time_to_next_sample: 0.0,
        }
    }
}

fn orthogonal_neighbor_keys(env: &EnvironmentGrid, base: CellKey) -> [CellKey; 4] {
    [
        env.add_key(base, 1, 0),
        env.add_key(base, -1, 0),
        env.add_key(base, 0, 1),
        env.add_key(base, 0, -1),
    ]
}

/// Food gradient from the four orthogonal neighbor cells: (right - left,
/// up - down). Boundary cells sample themselves, flattening the gradient
/// along the edge.
#[must_use]
pub fn food_gradient(env: &EnvironmentGrid, base: CellKey) -> Vec2 {
    let [right, left, up, down] = orthogonal_neighbor_keys(env, base);
    Vec2::new(
        env.peek_food(right) - env.peek_food(left),
        env.peek_food(up) - env.peek_food(down),
    )
}

#[must_use]
pub fn pheromone_gradient(env: &EnvironmentGrid, group_id: i32, base: CellKey) -> Vec2 {
    let [right, left, up, down] = orthogonal_neighbor_keys(env, base);
    Vec2::new(
        env.sample_pheromone(right, group_id) - env.sample_pheromone(left, group_id),
        env.sample_pheromone(up, group_id) - env.sample_pheromone(down, group_id),
    )
}

#[must_use]
pub fn danger_gradient(env: &EnvironmentGrid, base: CellKey) -> Vec2 {
    let [right, left, up, down] = orthogonal_neighbor_keys(env, base);
    Vec2::new(
        env.sample_danger(right) - env.sample_danger(left),
        env.sample_danger(up) - env.sample_danger(down),
    )
}

/// Drains accumulated simulation time into environment sub-ticks.
pub fn tick_environment(world: &mut World) {
    let env_dt = if world.config.environment_tick_interval > 1e-6 {
        world.config.environment_tick_interval
    } else {
        world.config.time_step
    };
    world.environment_accumulator += world.config.time_step;
    while world.environment_accumulator >= env_dt {
        let multiplier = update_food_regen_noise(
            &mut world.climate,
            &mut world.climate_rng,
            &world.config.environment,
            env_dt,
        );
        world.environment.set_food_regen_multiplier(multiplier);
        world.environment.tick(env_dt, &world.active_groups);
        world.environment_accumulator -= env_dt;
    }
}

/// Advances the climate noise by one sub-tick and returns the multiplier,
/// always clamped to `[max(0, 1 - amplitude), 1 + amplitude]`.
pub(crate) fn update_food_regen_noise(
    noise: &mut ClimateNoise,
    climate_rng: &mut DeterministicRng,
    config: &EnvironmentConfig,
    env_dt: f64,
) -> f64 {
    let amplitude = config.food_regen_noise_amplitude.max(0.0);
    let interval = config.food_regen_noise_interval_seconds;
    let smooth = config.food_regen_noise_smooth_seconds.max(0.0);

    if amplitude <= 1e-9 || interval <= 1e-6 {
        noise.multiplier = 1.0;
        noise.target = 1.0;
        noise.time_to_next_sample = 0.0;
        return noise.multiplier;
    }

    let low = (1.0 - amplitude).max(0.0);
    let high = 1.0 + amplitude;

    if noise.time_to_next_sample <= 0.0 {
        noise.time_to_next_sample = interval;
    }

    noise.time_to_next_sample -= env_dt;
    while noise.time_to_next_sample <= 0.0 {
        noise.target = climate_rng.next_range(low, high);
        noise.time_to_next_sample += interval;
        if smooth <= 1e-6 {
            noise.multiplier = noise.target;
        }
    }

    if smooth > 1e-6 {
        let alpha = 1.0 - (-env_dt / smooth).exp();
        noise.multiplier += (noise.target - noise.multiplier) * alpha;
    }

    noise.multiplier = noise.multiplier.clamp(low, high);
    noise.multiplier
}

/// Flushes the pending per-tick event buffers into the environment.
/// Events on the same key were merged by addition as they accumulated,
/// so flush order is immaterial.
pub fn apply_field_events(world: &mut World) {
    for (&key, &amount) in &world.pending_food {
        world.environment.add_food(key, amount);
    }
    for (&key, &amount) in &world.pending_danger {
        world.environment.add_danger(key, amount);
    }
    for (&(key, group_id), &amount) in &world.pending_pheromone {
        world.environment.add_pheromone(key, group_id, amount);
    }
    world.pending_food.clear();
    world.pending_danger.clear();
    world.pending_pheromone.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;

    fn quiet_environment() -> EnvironmentConfig {
        EnvironmentConfig {
            food_regen_per_second: 0.0,
            food_diffusion_rate: 0.0,
            food_decay_rate: 0.0,
            ..EnvironmentConfig::default()
        }
    }

    #[test]
    fn test_food_gradient_matches_cell_neighbors() {
        // 3x3 world with specific values in the four orthogonal
        // neighbors of the center cell.
        let mut env = EnvironmentGrid::new(1.0, &quiet_environment(), 3.0);
        env.add_food((2, 1), 6.0); // right
        env.add_food((0, 1), 2.0); // left
        env.add_food((1, 2), 5.0); // up
        env.add_food((1, 0), 1.0); // down
        let gradient = food_gradient(&env, (1, 1));
        assert!((gradient.x - 4.0).abs() < 1e-12);
        assert!((gradient.y - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_gradient_at_corner_clamps_to_edge_cells() {
        let mut env = EnvironmentGrid::new(1.0, &quiet_environment(), 3.0);
        env.add_food((1, 0), 4.0);
        // At (0,0) the left and down neighbors clamp to (0,0) itself.
        let gradient = food_gradient(&env, (0, 0));
        assert!((gradient.x - 4.0).abs() < 1e-12);
        assert_eq!(gradient.y, 0.0);
    }

    #[test]
    fn test_danger_gradient_points_toward_danger() {
        let mut env = EnvironmentGrid::new(1.0, &EnvironmentConfig::default(), 3.0);
        env.add_danger((2, 1), 1.0);
        let gradient = danger_gradient(&env, (1, 1));
        assert!(gradient.x > 0.0);
        assert_eq!(gradient.y, 0.0);
    }

    #[test]
    fn test_noise_multiplier_stays_within_amplitude_band() {
        let config = EnvironmentConfig {
            food_regen_noise_amplitude: 0.4,
            food_regen_noise_interval_seconds: 2.0,
            food_regen_noise_smooth_seconds: 1.0,
            ..EnvironmentConfig::default()
        };
        let mut noise = ClimateNoise::default();
        let mut rng = DeterministicRng::new(77);
        for _ in 0..500 {
            let multiplier = update_food_regen_noise(&mut noise, &mut rng, &config, 0.5);
            assert!((0.6..=1.4).contains(&multiplier));
        }
    }

    #[test]
    fn test_noise_disabled_when_amplitude_zero() {
        let config = EnvironmentConfig {
            food_regen_noise_amplitude: 0.0,
            ..EnvironmentConfig::default()
        };
        let mut noise = ClimateNoise {
            multiplier: 0.5,
            target: 0.5,
            time_to_next_sample: 3.0,
        };
        let mut rng = DeterministicRng::new(1);
        assert_eq!(update_food_regen_noise(&mut noise, &mut rng, &config, 0.1), 1.0);
    }

    #[test]
    fn test_zero_smooth_jumps_to_target() {
        let config = EnvironmentConfig {
            food_regen_noise_amplitude: 0.25,
            food_regen_noise_interval_seconds: 1.0,
            food_regen_noise_smooth_seconds: 0.0,
            ..EnvironmentConfig::default()
        };
        let mut noise = ClimateNoise::default();
        let mut rng = DeterministicRng::new(3);
        let multiplier = update_food_regen_noise(&mut noise, &mut rng, &config, 1.5);
        assert_eq!(multiplier, noise.target);
    }
}
