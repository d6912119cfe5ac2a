//! Configuration management for simulation parameters.
//!
//! Strongly-typed configuration sections composed into a root
//! [`SimulationConfig`]. All parameters have defaults; a TOML document may
//! override any subset of them via [`SimulationConfig::from_toml`]. Loading
//! and locating config files is the external driver's concern - the engine
//! only consumes the typed value.
//!
//! ## Example `config.toml`
//!
//! ```toml
//! seed = 42
//! initial_population = 200
//!
//! [species]
//! base_speed = 6.0
//! vision_radius = 8.0
//!
//! [environment]
//! food_per_cell = 12.0
//! ```

use serde::{Deserialize, Serialize};

/// Physical and metabolic parameters of the simulated species.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SpeciesConfig {
    pub base_speed: f64,
    pub max_acceleration: f64,
    pub vision_radius: f64,
    pub metabolism_per_second: f64,
    pub birth_energy_cost: f64,
    pub reproduction_energy_threshold: f64,
    pub adult_age: f64,
    pub initial_age_min: f64,
    pub initial_age_max: f64,
    pub max_age: f64,
    pub wander_jitter: f64,
    pub wander_refresh_seconds: f64,
    pub initial_energy_fraction_of_threshold: f64,
    pub energy_soft_cap: f64,
    pub high_energy_metabolism_slope: f64,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        Self {
            base_speed: 6.0,
            max_acceleration: 20.0,
            vision_radius: 8.0,
            metabolism_per_second: 0.8,
            birth_energy_cost: 8.0,
            reproduction_energy_threshold: 12.0,
            adult_age: 20.0,
            initial_age_min: 0.0,
            initial_age_max: 0.0,
            max_age: 80.0,
            wander_jitter: 0.45,
            wander_refresh_seconds: 2.0,
            initial_energy_fraction_of_threshold: 0.8,
            energy_soft_cap: 20.0,
            high_energy_metabolism_slope: 0.015,
        }
    }
}

/// A circular region with its own food parameters.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ResourcePatchConfig {
    pub position: (f64, f64),
    pub radius: f64,
    pub resource_per_cell: f64,
    pub regen_per_second: f64,
    pub initial_resource: f64,
}

impl Default for ResourcePatchConfig {
    fn default() -> Self {
        Self {
            position: (0.0, 0.0),
            radius: 5.0,
            resource_per_cell: 16.0,
            regen_per_second: 0.5,
            initial_resource: 10.0,
        }
    }
}

/// Environment field parameters: food, danger, pheromone, climate noise.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub food_per_cell: f64,
    pub food_regen_per_second: f64,
    pub food_consumption_rate: f64,
    pub food_diffusion_rate: f64,
    pub food_decay_rate: f64,
    pub food_from_death: f64,
    pub food_regen_noise_amplitude: f64,
    pub food_regen_noise_interval_seconds: f64,
    pub food_regen_noise_smooth_seconds: f64,
    pub danger_diffusion_rate: f64,
    pub danger_decay_rate: f64,
    pub danger_pulse_on_flee: f64,
    pub pheromone_diffusion_rate: f64,
    pub pheromone_decay_rate: f64,
    pub pheromone_deposit_on_birth: f64,
    pub resource_patches: Vec<ResourcePatchConfig>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            food_per_cell: 10.0,
            food_regen_per_second: 0.5,
            food_consumption_rate: 5.0,
            food_diffusion_rate: 0.0,
            food_decay_rate: 0.0,
            food_from_death: 3.0,
            food_regen_noise_amplitude: 0.3,
            food_regen_noise_interval_seconds: 25.0,
            food_regen_noise_smooth_seconds: 6.0,
            danger_diffusion_rate: 2.0,
            danger_decay_rate: 1.0,
            danger_pulse_on_flee: 1.0,
            pheromone_diffusion_rate: 0.1,
            pheromone_decay_rate: 0.0,
            pheromone_deposit_on_birth: 4.0,
            resource_patches: Vec::new(),
        }
    }
}

/// Density feedback, mortality, group tuning, and steering weights.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FeedbackConfig {
    pub local_density_soft_cap: u32,
    pub density_reproduction_penalty: f64,
    pub density_reproduction_slope: f64,
    pub reproduction_base_chance: f64,
    pub stress_drain_per_neighbor: f64,
    pub disease_probability_per_neighbor: f64,
    pub base_death_probability_per_second: f64,
    pub age_death_probability_per_second: f64,
    pub density_death_probability_per_neighbor_per_second: f64,

    pub group_formation_warmup_seconds: f64,
    pub group_formation_neighbor_threshold: u32,
    pub group_formation_chance: f64,
    pub group_adoption_neighbor_threshold: u32,
    pub group_adoption_chance: f64,
    pub group_adoption_small_group_bonus: f64,
    pub group_adoption_guard_min_allies: u32,
    pub group_split_neighbor_threshold: u32,
    pub group_split_chance: f64,
    pub group_split_chance_max: f64,
    pub group_split_size_bonus_per_neighbor: f64,
    pub group_split_size_stress_weight: f64,
    pub group_split_stress_threshold: f64,
    pub group_split_new_group_chance: f64,
    pub group_split_recruitment_count: u32,
    pub group_birth_seed_chance: f64,
    pub group_mutation_chance: f64,
    pub group_cohesion_radius: f64,
    pub group_cohesion_weight: f64,
    pub group_detach_radius: f64,
    pub group_detach_close_neighbor_threshold: u32,
    pub group_detach_after_seconds: f64,
    pub group_detach_new_group_chance: f64,
    pub group_switch_chance: f64,
    pub group_merge_cooldown_seconds: f64,
    pub group_reproduction_penalty_per_ally: f64,
    pub group_reproduction_min_factor: f64,

    pub personal_space_radius: f64,
    pub personal_space_weight: f64,
    pub min_separation_distance: f64,
    pub min_separation_weight: f64,
    pub ally_cohesion_weight: f64,
    pub ally_separation_weight: f64,
    pub other_group_separation_weight: f64,
    pub other_group_avoid_radius: f64,
    pub other_group_avoid_weight: f64,
    pub group_base_attraction_weight: f64,
    pub group_base_soft_radius: f64,
    pub group_base_dead_zone: f64,
    pub group_seek_radius: f64,
    pub group_seek_weight: f64,

    pub group_update_stride: u32,
    pub group_update_population_threshold: u32,
    pub steering_update_stride: u32,
    pub steering_update_population_threshold: u32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            local_density_soft_cap: 15,
            density_reproduction_penalty: 0.6,
            density_reproduction_slope: 0.02,
            reproduction_base_chance: 0.8,
            stress_drain_per_neighbor: 0.01,
            disease_probability_per_neighbor: 0.002,
            base_death_probability_per_second: 0.0005,
            age_death_probability_per_second: 0.00015,
            density_death_probability_per_neighbor_per_second: 0.0001,

            group_formation_warmup_seconds: 0.0,
            group_formation_neighbor_threshold: 5,
            group_formation_chance: 0.02,
            group_adoption_neighbor_threshold: 2,
            group_adoption_chance: 0.05,
            group_adoption_small_group_bonus: 2.0,
            group_adoption_guard_min_allies: 2,
            group_split_neighbor_threshold: 10,
            group_split_chance: 0.0015,
            group_split_chance_max: 0.03,
            group_split_size_bonus_per_neighbor: 0.0008,
            group_split_size_stress_weight: 0.015,
            group_split_stress_threshold: 0.4,
            group_split_new_group_chance: 0.7,
            group_split_recruitment_count: 3,
            group_birth_seed_chance: 0.35,
            group_mutation_chance: 0.05,
            group_cohesion_radius: 6.0,
            group_cohesion_weight: 0.8,
            group_detach_radius: 3.0,
            group_detach_close_neighbor_threshold: 3,
            group_detach_after_seconds: 5.0,
            group_detach_new_group_chance: 0.25,
            group_switch_chance: 0.2,
            group_merge_cooldown_seconds: 4.0,
            group_reproduction_penalty_per_ally: 0.04,
            group_reproduction_min_factor: 0.35,

            personal_space_radius: 1.6,
            personal_space_weight: 0.5,
            min_separation_distance: 0.9,
            min_separation_weight: 1.2,
            ally_cohesion_weight: 1.0,
            ally_separation_weight: 1.0,
            other_group_separation_weight: 1.3,
            other_group_avoid_radius: 5.0,
            other_group_avoid_weight: 0.6,
            group_base_attraction_weight: 0.35,
            group_base_soft_radius: 9.0,
            group_base_dead_zone: 3.0,
            group_seek_radius: 12.0,
            group_seek_weight: 0.3,

            group_update_stride: 2,
            group_update_population_threshold: 350,
            steering_update_stride: 2,
            steering_update_population_threshold: 400,
        }
    }
}

/// Per-gene clamp ranges, applied at sampling and after every mutation.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EvolutionClampConfig {
    pub speed: (f64, f64),
    pub metabolism: (f64, f64),
    pub disease_resistance: (f64, f64),
    pub fertility: (f64, f64),
    pub sociality: (f64, f64),
    pub territoriality: (f64, f64),
    pub loyalty: (f64, f64),
    pub founder: (f64, f64),
    pub kin_bias: (f64, f64),
}

impl Default for EvolutionClampConfig {
    fn default() -> Self {
        Self {
            speed: (0.6, 1.6),
            metabolism: (0.6, 1.6),
            disease_resistance: (0.5, 2.0),
            fertility: (0.5, 1.5),
            sociality: (0.4, 1.8),
            territoriality: (0.2, 1.8),
            loyalty: (0.4, 1.6),
            founder: (0.2, 1.8),
            kin_bias: (0.6, 2.0),
        }
    }
}

/// Trait inheritance and mutation parameters.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EvolutionConfig {
    pub enabled: bool,
    pub mutation_strength: f64,
    pub trait_mutation_chance: f64,
    pub lineage_mutation_chance: f64,
    pub speed_mutation_weight: f64,
    pub metabolism_mutation_weight: f64,
    pub disease_resistance_mutation_weight: f64,
    pub fertility_mutation_weight: f64,
    pub sociality_mutation_weight: f64,
    pub territoriality_mutation_weight: f64,
    pub loyalty_mutation_weight: f64,
    pub founder_mutation_weight: f64,
    pub kin_bias_mutation_weight: f64,
    pub clamp: EvolutionClampConfig,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mutation_strength: 0.08,
            trait_mutation_chance: 0.25,
            lineage_mutation_chance: 0.02,
            speed_mutation_weight: 1.0,
            metabolism_mutation_weight: 1.0,
            disease_resistance_mutation_weight: 1.0,
            fertility_mutation_weight: 1.0,
            sociality_mutation_weight: 1.0,
            territoriality_mutation_weight: 1.0,
            loyalty_mutation_weight: 1.0,
            founder_mutation_weight: 1.0,
            kin_bias_mutation_weight: 1.0,
            clamp: EvolutionClampConfig::default(),
        }
    }
}

/// HSL appearance inheritance parameters.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppearanceConfig {
    pub base_h: f64,
    pub base_s: f64,
    pub base_l: f64,
    pub mutation_chance: f64,
    pub mutation_delta_h: f64,
    pub mutation_delta_s: f64,
    pub mutation_delta_l: f64,
    /// When set, hue mutations additionally shift by this many degrees
    /// with a sign derived from the child's group id parity.
    pub bias_h_group_deg: Option<f64>,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            base_h: 50.0,
            base_s: 1.0,
            base_l: 0.83,
            mutation_chance: 0.2,
            mutation_delta_h: 18.0,
            mutation_delta_s: 0.08,
            mutation_delta_l: 0.06,
            bias_h_group_deg: None,
        }
    }
}

/// Root configuration composing all sections.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub time_step: f64,
    pub environment_tick_interval: f64,
    pub initial_population: usize,
    pub max_population: usize,
    pub world_size: f64,
    pub boundary_margin: f64,
    pub boundary_avoidance_weight: f64,
    pub boundary_turn_weight: f64,
    pub cell_size: f64,
    pub seed: u64,
    pub config_version: String,
    pub species: SpeciesConfig,
    pub environment: EnvironmentConfig,
    pub feedback: FeedbackConfig,
    pub evolution: EvolutionConfig,
    pub appearance: AppearanceConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_step: 0.02,
            environment_tick_interval: 0.1,
            initial_population: 120,
            max_population: 700,
            world_size: 100.0,
            boundary_margin: 4.0,
            boundary_avoidance_weight: 1.1,
            boundary_turn_weight: 0.8,
            cell_size: 2.5,
            seed: 1337,
            config_version: "v1".to_string(),
            species: SpeciesConfig::default(),
            environment: EnvironmentConfig::default(),
            feedback: FeedbackConfig::default(),
            evolution: EvolutionConfig::default(),
            appearance: AppearanceConfig::default(),
        }
    }
}

fn ensure_clamp_range(name: &str, range: (f64, f64)) -> anyhow::Result<()> {
    anyhow::ensure!(
        range.0 <= range.1,
        "Trait clamp range for {} must have lo <= hi (got {} > {})",
        name,
        range.0,
        range.1
    );
    Ok(())
}

impl SimulationConfig {
    /// Validates all configuration parameters.
    ///
    /// Returns `Ok(())` if all parameters are valid, or `Err` with a
    /// description of the first validation failure. Called eagerly from
    /// `World::new`; a failure is fatal to engine construction.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.time_step > 0.0, "Time step must be positive");
        anyhow::ensure!(self.world_size > 0.0, "World size must be positive");
        anyhow::ensure!(self.cell_size > 0.0, "Cell size must be positive");
        anyhow::ensure!(
            self.environment_tick_interval >= 0.0,
            "Environment tick interval must be non-negative"
        );
        anyhow::ensure!(
            self.initial_population <= self.max_population,
            "Initial population ({}) exceeds max population ({})",
            self.initial_population,
            self.max_population
        );
        anyhow::ensure!(
            self.boundary_margin >= 0.0,
            "Boundary margin must be non-negative"
        );
        anyhow::ensure!(
            self.boundary_avoidance_weight >= 0.0,
            "Boundary avoidance weight must be non-negative"
        );
        anyhow::ensure!(
            self.boundary_turn_weight >= 0.0,
            "Boundary turn weight must be non-negative"
        );

        let species = &self.species;
        anyhow::ensure!(species.base_speed >= 0.0, "Base speed must be non-negative");
        anyhow::ensure!(
            species.max_acceleration >= 0.0,
            "Max acceleration must be non-negative"
        );
        anyhow::ensure!(
            species.vision_radius >= 0.0,
            "Vision radius must be non-negative"
        );
        anyhow::ensure!(species.max_age > 0.0, "Max age must be positive");
        anyhow::ensure!(
            species.reproduction_energy_threshold > 0.0,
            "Reproduction energy threshold must be positive"
        );
        anyhow::ensure!(
            species.initial_age_min >= 0.0,
            "Initial age min must be non-negative"
        );
        anyhow::ensure!(
            species.wander_refresh_seconds > 0.0,
            "Wander refresh must be positive"
        );

        let environment = &self.environment;
        anyhow::ensure!(
            environment.food_per_cell >= 0.0,
            "Food per cell must be non-negative"
        );
        anyhow::ensure!(
            environment.food_regen_per_second >= 0.0,
            "Food regen must be non-negative"
        );
        anyhow::ensure!(
            environment.food_consumption_rate >= 0.0,
            "Food consumption rate must be non-negative"
        );
        anyhow::ensure!(
            environment.food_diffusion_rate >= 0.0 && environment.food_decay_rate >= 0.0,
            "Food diffusion and decay rates must be non-negative"
        );
        anyhow::ensure!(
            environment.danger_diffusion_rate >= 0.0 && environment.danger_decay_rate >= 0.0,
            "Danger diffusion and decay rates must be non-negative"
        );
        anyhow::ensure!(
            environment.pheromone_diffusion_rate >= 0.0
                && environment.pheromone_decay_rate >= 0.0,
            "Pheromone diffusion and decay rates must be non-negative"
        );
        anyhow::ensure!(
            environment.food_from_death >= 0.0,
            "Food from death must be non-negative"
        );
        for patch in &environment.resource_patches {
            anyhow::ensure!(patch.radius > 0.0, "Resource patch radius must be positive");
            anyhow::ensure!(
                patch.resource_per_cell >= 0.0 && patch.regen_per_second >= 0.0,
                "Resource patch amounts must be non-negative"
            );
        }

        let feedback = &self.feedback;
        anyhow::ensure!(
            feedback.reproduction_base_chance >= 0.0,
            "Reproduction base chance must be non-negative"
        );
        anyhow::ensure!(
            feedback.stress_drain_per_neighbor >= 0.0,
            "Stress drain must be non-negative"
        );
        anyhow::ensure!(
            feedback.disease_probability_per_neighbor >= 0.0,
            "Disease probability must be non-negative"
        );
        anyhow::ensure!(
            feedback.base_death_probability_per_second >= 0.0
                && feedback.age_death_probability_per_second >= 0.0
                && feedback.density_death_probability_per_neighbor_per_second >= 0.0,
            "Death probabilities must be non-negative"
        );
        anyhow::ensure!(
            feedback.personal_space_weight >= 0.0
                && feedback.min_separation_weight >= 0.0
                && feedback.ally_cohesion_weight >= 0.0
                && feedback.other_group_avoid_weight >= 0.0
                && feedback.group_base_attraction_weight >= 0.0
                && feedback.group_seek_weight >= 0.0
                && feedback.group_cohesion_weight >= 0.0,
            "Steering weights must be non-negative"
        );
        anyhow::ensure!(
            feedback.group_base_dead_zone >= 0.0
                && feedback.group_base_soft_radius >= 0.0
                && feedback.group_seek_radius >= 0.0
                && feedback.group_cohesion_radius >= 0.0
                && feedback.group_detach_radius >= 0.0
                && feedback.other_group_avoid_radius >= 0.0
                && feedback.personal_space_radius >= 0.0
                && feedback.min_separation_distance >= 0.0,
            "Steering radii must be non-negative"
        );

        let evolution = &self.evolution;
        anyhow::ensure!(
            evolution.mutation_strength >= 0.0,
            "Mutation strength must be non-negative"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&evolution.trait_mutation_chance),
            "Trait mutation chance must be in [0.0, 1.0]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&evolution.lineage_mutation_chance),
            "Lineage mutation chance must be in [0.0, 1.0]"
        );
        let clamp = &evolution.clamp;
        ensure_clamp_range("speed", clamp.speed)?;
        ensure_clamp_range("metabolism", clamp.metabolism)?;
        ensure_clamp_range("disease_resistance", clamp.disease_resistance)?;
        ensure_clamp_range("fertility", clamp.fertility)?;
        ensure_clamp_range("sociality", clamp.sociality)?;
        ensure_clamp_range("territoriality", clamp.territoriality)?;
        ensure_clamp_range("loyalty", clamp.loyalty)?;
        ensure_clamp_range("founder", clamp.founder)?;
        ensure_clamp_range("kin_bias", clamp.kin_bias)?;

        let appearance = &self.appearance;
        anyhow::ensure!(
            (0.0..=1.0).contains(&appearance.base_s) && (0.0..=1.0).contains(&appearance.base_l),
            "Appearance saturation and lightness must be in [0.0, 1.0]"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&appearance.mutation_chance),
            "Appearance mutation chance must be in [0.0, 1.0]"
        );

        Ok(())
    }

    /// Parses and validates a configuration from TOML text.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config = toml::from_str::<Self>(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Stable digest of the behavior-relevant sections, for tagging runs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.species).as_bytes());
        hasher.update(format!("{:?}", self.environment).as_bytes());
        hasher.update(format!("{:?}", self.feedback).as_bytes());
        hasher.update(format!("{:?}", self.evolution).as_bytes());
        hasher.update(format!("{:?}", self.appearance).as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cell_size_rejected() {
        let config = SimulationConfig {
            cell_size: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_world_size_rejected() {
        let config = SimulationConfig {
            world_size: -5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_clamp_range_rejected() {
        let mut config = SimulationConfig::default();
        config.evolution.clamp.loyalty = (1.6, 0.4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initial_population_above_max_rejected() {
        let config = SimulationConfig {
            initial_population: 900,
            max_population: 700,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = SimulationConfig::default();
        config.feedback.personal_space_weight = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial_document() {
        let config = SimulationConfig::from_toml(
            r#"
            seed = 99
            initial_population = 40

            [species]
            base_speed = 4.5

            [feedback]
            group_cohesion_weight = 0.5
            "#,
        )
        .expect("partial toml should parse");
        assert_eq!(config.seed, 99);
        assert_eq!(config.initial_population, 40);
        assert_eq!(config.species.base_speed, 4.5);
        assert_eq!(config.feedback.group_cohesion_weight, 0.5);
        // Untouched fields keep their defaults.
        assert_eq!(config.world_size, 100.0);
        assert_eq!(config.species.max_age, 80.0);
    }

    #[test]
    fn test_from_toml_rejects_invalid_values() {
        let result = SimulationConfig::from_toml("time_step = -1.0");
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_consistency() {
        let a = SimulationConfig::default();
        let b = SimulationConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = SimulationConfig::default();
        c.species.base_speed = 7.0;
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
