//! The world orchestrator.
//!
//! Owns the agent population, the spatial index, the environment fields,
//! the four RNG streams, and all per-tick scratch buffers. `step` drives
//! the phases in order: rebuild the index, update each agent (membership,
//! steering, integration, lifecycle) in stable ascending-index order,
//! append births, compact the dead, prune group bases, flush field
//! events, and advance the environment sub-tick.

use crate::config::SimulationConfig;
use crate::environment::{CellKey, EnvironmentGrid};
use crate::rng::DeterministicRng;
use crate::spatial_grid::{NeighborScratch, SpatialGrid};
use crate::systems::fields::{self, ClimateNoise};
use crate::systems::metrics::{self as metrics_system, PopulationStats};
use crate::systems::{groups, lifecycle, steering};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;
use terrarium_data::{
    Agent, AgentSnapshot, AgentState, AgentTraits, Snapshot, SnapshotFields, SnapshotMetadata,
    SnapshotWorld, TickMetrics, Vec2, UNGROUPED,
};

const CLIMATE_RNG_SALT: u64 = 0xC0A1_F00D_5EED_1234;
const APPEARANCE_RNG_SALT: u64 = 0xA51E_0EA7_E9CA_2311;
const TRAIT_RNG_SALT: u64 = 0x7BAD_CA11_C0FF_EE01;

fn derive_stream_seed(seed: u64, salt: u64) -> u64 {
    seed ^ salt
}

pub struct World {
    pub(crate) config: SimulationConfig,
    pub(crate) rng: DeterministicRng,
    pub(crate) climate_rng: DeterministicRng,
    pub(crate) appearance_rng: DeterministicRng,
    pub(crate) trait_rng: DeterministicRng,
    pub(crate) grid: SpatialGrid,
    pub(crate) environment: EnvironmentGrid,
    pub(crate) agents: Vec<Agent>,
    pub(crate) birth_queue: Vec<Agent>,
    pub(crate) neighbor_scratch: NeighborScratch,
    pub(crate) group_counts_scratch: BTreeMap<i32, u32>,
    pub(crate) group_lineage_counts: BTreeMap<i32, u32>,
    pub(crate) ungrouped_neighbors: Vec<usize>,
    pub(crate) paired_ids: HashSet<u64>,
    pub(crate) group_sizes: BTreeMap<i32, u32>,
    pub(crate) group_bases: BTreeMap<i32, Vec2>,
    pub(crate) active_groups: BTreeSet<i32>,
    pub(crate) pending_food: BTreeMap<CellKey, f64>,
    pub(crate) pending_danger: BTreeMap<CellKey, f64>,
    pub(crate) pending_pheromone: BTreeMap<(CellKey, i32), f64>,
    pub(crate) next_id: u64,
    pub(crate) next_group_id: i32,
    pub(crate) next_lineage_id: u64,
    pub(crate) metrics: Option<TickMetrics>,
    pub(crate) environment_accumulator: f64,
    pub(crate) climate: ClimateNoise,
    pub(crate) vision_cell_offsets: Vec<(i32, i32)>,
    pub(crate) vision_radius_sq: f64,
}

impl World {
    /// Builds a world from a validated configuration and bootstraps the
    /// initial population. Configuration errors are fatal here; `step`
    /// and `snapshot` never fail afterwards.
    pub fn new(config: SimulationConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let seed = config.seed;
        let grid = SpatialGrid::new(config.cell_size, config.world_size);
        let environment = EnvironmentGrid::new(config.cell_size, &config.environment, config.world_size);
        let mut world = Self {
            rng: DeterministicRng::new(seed),
            climate_rng: DeterministicRng::new(derive_stream_seed(seed, CLIMATE_RNG_SALT)),
            appearance_rng: DeterministicRng::new(derive_stream_seed(seed, APPEARANCE_RNG_SALT)),
            trait_rng: DeterministicRng::new(derive_stream_seed(seed, TRAIT_RNG_SALT)),
            grid,
            environment,
            agents: Vec::new(),
            birth_queue: Vec::new(),
            neighbor_scratch: NeighborScratch::default(),
            group_counts_scratch: BTreeMap::new(),
            group_lineage_counts: BTreeMap::new(),
            ungrouped_neighbors: Vec::new(),
            paired_ids: HashSet::new(),
            group_sizes: BTreeMap::new(),
            group_bases: BTreeMap::new(),
            active_groups: BTreeSet::new(),
            pending_food: BTreeMap::new(),
            pending_danger: BTreeMap::new(),
            pending_pheromone: BTreeMap::new(),
            next_id: 0,
            next_group_id: 0,
            next_lineage_id: 0,
            metrics: None,
            environment_accumulator: 0.0,
            climate: ClimateNoise::default(),
            vision_cell_offsets: Vec::new(),
            vision_radius_sq: 0.0,
            config,
        };
        world.refresh_vision_cache();
        world.bootstrap_population();
        tracing::debug!(
            seed = world.config.seed,
            population = world.agents.len(),
            "World initialized"
        );
        Ok(world)
    }

    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    #[must_use]
    pub fn population(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&TickMetrics> {
        self.metrics.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Clears all agents, fields, and queues and rewinds all four RNG
    /// streams to their seed-derived initial states.
    pub fn reset(&mut self) {
        self.agents.clear();
        self.birth_queue.clear();
        self.environment.reset();
        self.grid.clear();
        self.neighbor_scratch.clear();
        self.group_counts_scratch.clear();
        self.group_lineage_counts.clear();
        self.ungrouped_neighbors.clear();
        self.paired_ids.clear();
        self.group_sizes.clear();
        self.group_bases.clear();
        self.active_groups.clear();
        self.pending_food.clear();
        self.pending_danger.clear();
        self.pending_pheromone.clear();
        self.rng.reset();
        self.climate_rng.reset();
        self.appearance_rng.reset();
        self.trait_rng.reset();
        self.next_id = 0;
        self.next_group_id = 0;
        self.next_lineage_id = 0;
        self.metrics = None;
        self.environment_accumulator = 0.0;
        self.climate = ClimateNoise::default();
        self.refresh_vision_cache();
        self.bootstrap_population();
    }

    /// Advances the simulation by one tick.
    pub fn step(&mut self, tick: u64) -> TickMetrics {
        let start = Instant::now();
        let dt = self.config.time_step;
        self.pending_food.clear();
        self.pending_danger.clear();
        self.pending_pheromone.clear();

        let sim_time = tick as f64 * dt;
        let can_form_groups = sim_time >= self.config.feedback.group_formation_warmup_seconds;

        self.group_sizes.clear();
        let current_population = self.agents.len();

        let group_update_stride = u64::from(self.config.feedback.group_update_stride.max(1));
        let use_group_stride = current_population
            >= self.config.feedback.group_update_population_threshold as usize
            && group_update_stride > 1;
        let steering_stride = u64::from(self.config.feedback.steering_update_stride.max(1));
        let use_steering_stride = current_population
            >= self.config.feedback.steering_update_population_threshold as usize
            && steering_stride > 1;
        let detach_radius_sq =
            self.config.feedback.group_detach_radius * self.config.feedback.group_detach_radius;
        let close_threshold = self.config.feedback.group_detach_close_neighbor_threshold;

        self.grid.clear();
        for (index, agent) in self.agents.iter().enumerate() {
            if agent.group_id >= 0 {
                *self.group_sizes.entry(agent.group_id).or_insert(0) += 1;
            }
            self.grid.insert(index, agent.position);
        }

        let mut neighbor_checks: u64 = 0;
        let mut births: u32 = 0;
        self.paired_ids.clear();
        self.active_groups.clear();

        let mut stats = PopulationStats::default();
        let danger_present = self.environment.has_danger();
        let mut scratch = std::mem::take(&mut self.neighbor_scratch);

        for index in 0..self.agents.len() {
            if !self.agents[index].alive {
                continue;
            }
            let mut agent = std::mem::take(&mut self.agents[index]);

            let traits = if agent.traits_dirty {
                let clamped = self.clamp_traits(agent.traits);
                agent.traits = clamped;
                agent.traits_dirty = false;
                clamped
            } else {
                agent.traits
            };
            let speed_limit = self.trait_speed_limit(&traits);

            self.grid.collect_neighbors(
                &self.agents,
                agent.position,
                &self.vision_cell_offsets,
                self.vision_radius_sq,
                index,
                &mut scratch,
            );
            let neighbor_count = scratch.len() as u32;
            neighbor_checks += u64::from(neighbor_count);

            let same_group_neighbors = if use_group_stride
                && (tick + agent.id) % group_update_stride != 0
            {
                let mut same = 0u32;
                let mut close = 0u32;
                if agent.group_id != UNGROUPED {
                    for k in 0..scratch.len() {
                        if self.agents[scratch.indices[k]].group_id != agent.group_id {
                            continue;
                        }
                        same += 1;
                        if scratch.dist_sq[k] <= detach_radius_sq {
                            close += 1;
                        }
                    }
                    if close >= close_threshold {
                        agent.group_lonely_seconds = 0.0;
                    } else {
                        agent.group_lonely_seconds += dt;
                    }
                } else {
                    agent.group_lonely_seconds = 0.0;
                }
                groups::decay_group_cooldown(dt, &mut agent);
                same
            } else {
                groups::update_group_membership(
                    self,
                    &mut agent,
                    &scratch,
                    can_form_groups,
                    detach_radius_sq,
                    close_threshold,
                    &traits,
                )
            };

            let steering_update =
                !use_steering_stride || (tick + agent.id) % steering_stride == 0;
            let (desired, sensed_danger) = if steering_update {
                let base_cell_key = self.environment.cell_key(agent.position);
                let (desired, sensed) = steering::compute_desired_velocity(
                    self,
                    &mut agent,
                    &scratch,
                    speed_limit,
                    &traits,
                    danger_present,
                    base_cell_key,
                );
                agent.last_desired = desired;
                agent.last_sensed_danger = sensed;
                (desired, sensed)
            } else {
                (agent.last_desired, agent.last_sensed_danger)
            };

            let accel =
                (desired - agent.velocity).clamp_length(self.config.species.max_acceleration);
            let velocity = (agent.velocity + accel * dt).clamp_length(speed_limit);
            agent.position += velocity * dt;
            steering::resolve_overlap(
                self.config.feedback.min_separation_distance,
                &mut agent.position,
                &scratch,
            );
            let (px, py, vx, vy) = Self::reflect(
                agent.position.x,
                agent.position.y,
                velocity.x,
                velocity.y,
                self.config.world_size,
            );
            agent.position = Vec2::new(px, py);
            agent.velocity = Vec2::new(vx, vy);
            if agent.velocity.length_squared() > 1e-8 {
                agent.heading = agent.velocity.heading();
            }
            agent.age += dt;

            let base_cell_key = self.environment.cell_key(agent.position);
            births += lifecycle::apply_life_cycle(
                self,
                &mut agent,
                &scratch,
                neighbor_count,
                same_group_neighbors,
                can_form_groups,
                &traits,
                base_cell_key,
            );
            if agent.state == AgentState::Flee || sensed_danger {
                *self.pending_danger.entry(base_cell_key).or_insert(0.0) +=
                    self.config.environment.danger_pulse_on_flee;
            }
            if agent.alive {
                stats.population += 1;
                stats.energy_sum += agent.energy;
                stats.age_sum += agent.age;
                if agent.group_id == UNGROUPED {
                    stats.ungrouped += 1;
                } else {
                    self.active_groups.insert(agent.group_id);
                }
            }
            self.agents[index] = agent;
        }
        self.neighbor_scratch = scratch;

        for born in &self.birth_queue {
            stats.population += 1;
            stats.energy_sum += born.energy;
            stats.age_sum += born.age;
            if born.group_id == UNGROUPED {
                stats.ungrouped += 1;
            } else {
                self.active_groups.insert(born.group_id);
            }
        }
        self.apply_births();
        let deaths = self.remove_dead();
        groups::prune_group_bases(self);
        fields::apply_field_events(self);
        fields::tick_environment(self);

        stats.groups = self.active_groups.len();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let metrics =
            metrics_system::create_metrics(tick, births, deaths, neighbor_checks, elapsed_ms, stats);
        metrics_system::log_tick(&metrics);
        self.metrics = Some(metrics.clone());
        metrics
    }

    /// Builds the payload streamed to the external visualizer.
    #[must_use]
    pub fn snapshot(&self, tick: u64) -> Snapshot {
        let metrics = match &self.metrics {
            Some(metrics) => metrics.clone(),
            None => self.state_metrics(tick),
        };
        let agents = self
            .agents
            .iter()
            .filter(|agent| agent.alive)
            .map(|agent| self.agent_snapshot(agent))
            .collect();
        let metadata = SnapshotMetadata {
            world_size: self.config.world_size,
            sim_dt: self.config.time_step,
            tick_rate: if self.config.time_step <= 0.0 {
                0.0
            } else {
                1.0 / self.config.time_step
            },
            seed: self.config.seed,
            config_version: self.config.config_version.clone(),
        };
        Snapshot {
            tick,
            metrics,
            agents,
            world: SnapshotWorld {
                size: self.config.world_size,
            },
            metadata,
            fields: SnapshotFields {
                food: self.environment.export_food_cells(),
                pheromones: self.environment.export_pheromone_field(),
            },
        }
    }

    pub(crate) fn allocate_agent_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn allocate_group(&mut self) -> i32 {
        let group = self.next_group_id;
        self.next_group_id += 1;
        group
    }

    pub(crate) fn allocate_lineage(&mut self) -> u64 {
        let lineage = self.next_lineage_id;
        self.next_lineage_id += 1;
        lineage
    }

    pub(crate) fn clamp_traits(&self, mut traits: AgentTraits) -> AgentTraits {
        let clamp = &self.config.evolution.clamp;
        traits.speed = traits.speed.clamp(clamp.speed.0, clamp.speed.1);
        traits.metabolism = traits.metabolism.clamp(clamp.metabolism.0, clamp.metabolism.1);
        traits.disease_resistance = traits
            .disease_resistance
            .clamp(clamp.disease_resistance.0, clamp.disease_resistance.1);
        traits.fertility = traits.fertility.clamp(clamp.fertility.0, clamp.fertility.1);
        traits.sociality = traits.sociality.clamp(clamp.sociality.0, clamp.sociality.1);
        traits.territoriality = traits
            .territoriality
            .clamp(clamp.territoriality.0, clamp.territoriality.1);
        traits.loyalty = traits.loyalty.clamp(clamp.loyalty.0, clamp.loyalty.1);
        traits.founder = traits.founder.clamp(clamp.founder.0, clamp.founder.1);
        traits.kin_bias = traits.kin_bias.clamp(clamp.kin_bias.0, clamp.kin_bias.1);
        traits
    }

    pub(crate) fn trait_speed_limit(&self, traits: &AgentTraits) -> f64 {
        self.config.species.base_speed * traits.speed
    }

    pub(crate) fn trait_metabolism_multiplier(&self, traits: &AgentTraits) -> f64 {
        (traits.metabolism * (0.6 + 0.4 * traits.speed)).clamp(0.2, 2.5)
    }

    pub(crate) fn trait_disease_resistance(&self, traits: &AgentTraits) -> f64 {
        traits.disease_resistance.clamp(0.25, 4.0)
    }

    pub(crate) fn trait_reproduction_factor(&self, traits: &AgentTraits) -> f64 {
        let resistance_penalty = 0.7 + 0.3 / traits.disease_resistance.max(0.5);
        let speed_penalty = 0.8 + 0.2 / traits.speed.max(0.6);
        (traits.fertility * resistance_penalty * speed_penalty).clamp(0.35, 1.5)
    }

    pub(crate) fn inherit_group_pair(&mut self, first: i32, second: i32) -> i32 {
        if first == second {
            return first;
        }
        if self.rng.next_float() < 0.5 {
            first
        } else {
            second
        }
    }

    pub(crate) fn inherit_lineage_pair(&mut self, first: u64, second: u64) -> u64 {
        let lineage = if self.rng.next_float() < 0.5 { first } else { second };
        if self.config.evolution.enabled
            && self.config.evolution.lineage_mutation_chance > 0.0
            && self.rng.next_float() < self.config.evolution.lineage_mutation_chance
        {
            return self.allocate_lineage();
        }
        lineage
    }

    pub(crate) fn inherit_traits_pair(
        &mut self,
        first: &AgentTraits,
        second: &AgentTraits,
    ) -> AgentTraits {
        let mut averaged = AgentTraits {
            speed: (first.speed + second.speed) * 0.5,
            metabolism: (first.metabolism + second.metabolism) * 0.5,
            disease_resistance: (first.disease_resistance + second.disease_resistance) * 0.5,
            fertility: (first.fertility + second.fertility) * 0.5,
            sociality: (first.sociality + second.sociality) * 0.5,
            territoriality: (first.territoriality + second.territoriality) * 0.5,
            loyalty: (first.loyalty + second.loyalty) * 0.5,
            founder: (first.founder + second.founder) * 0.5,
            kin_bias: (first.kin_bias + second.kin_bias) * 0.5,
        };
        let evolution = self.config.evolution.clone();
        if !evolution.enabled || evolution.mutation_strength <= 0.0 {
            return self.clamp_traits(averaged);
        }
        let chance = evolution.trait_mutation_chance.clamp(0.0, 1.0);
        let strength = evolution.mutation_strength;
        mutate_gene(&mut self.rng, &mut averaged.speed, chance, strength, evolution.speed_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.metabolism, chance, strength, evolution.metabolism_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.disease_resistance, chance, strength, evolution.disease_resistance_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.fertility, chance, strength, evolution.fertility_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.sociality, chance, strength, evolution.sociality_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.territoriality, chance, strength, evolution.territoriality_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.loyalty, chance, strength, evolution.loyalty_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.founder, chance, strength, evolution.founder_mutation_weight);
        mutate_gene(&mut self.rng, &mut averaged.kin_bias, chance, strength, evolution.kin_bias_mutation_weight);
        self.clamp_traits(averaged)
    }

    /// Child appearance: circular-mean hue, averaged saturation and
    /// lightness, with an optional group-parity hue bias on mutation.
    pub(crate) fn inherit_appearance_pair(
        &mut self,
        first: (f64, f64, f64),
        second: (f64, f64, f64),
        child_group: i32,
    ) -> (f64, f64, f64) {
        let appearance = self.config.appearance.clone();
        let mut hue = circular_mean_deg(first.0, second.0);
        let mut saturation = (first.1 + second.1) * 0.5;
        let mut lightness = (first.2 + second.2) * 0.5;
        if appearance.mutation_chance > 0.0
            && self.appearance_rng.next_float() < appearance.mutation_chance
        {
            let mut delta = self
                .appearance_rng
                .next_range(-appearance.mutation_delta_h, appearance.mutation_delta_h);
            if let Some(bias) = appearance.bias_h_group_deg {
                if child_group != UNGROUPED {
                    delta += if child_group % 2 == 0 { bias } else { -bias };
                }
            }
            hue = wrap_hue(hue + delta);
            saturation = (saturation
                + self
                    .appearance_rng
                    .next_range(-appearance.mutation_delta_s, appearance.mutation_delta_s))
            .clamp(0.0, 1.0);
            lightness = (lightness
                + self
                    .appearance_rng
                    .next_range(-appearance.mutation_delta_l, appearance.mutation_delta_l))
            .clamp(0.0, 1.0);
        }
        (hue, saturation, lightness)
    }

    fn bootstrap_population(&mut self) {
        let world_size = self.config.world_size;
        let appearance = self.config.appearance.clone();
        let energy = self.config.species.reproduction_energy_threshold
            * self.config.species.initial_energy_fraction_of_threshold;
        let wander_time = self.config.species.wander_refresh_seconds;
        for _ in 0..self.config.initial_population {
            let traits = self.sample_initial_traits();
            let lineage = self.allocate_lineage();
            let speed_limit = self.trait_speed_limit(&traits);
            let position = Vec2::new(
                self.rng.next_range(0.0, world_size),
                self.rng.next_range(0.0, world_size),
            );
            let velocity = self.rng.next_unit_circle() * (speed_limit * 0.3);
            let age = self.sample_initial_age();
            let wander_dir = self.rng.next_unit_circle();
            let id = self.allocate_agent_id();
            self.agents.push(Agent {
                id,
                generation: 0,
                lineage_id: lineage,
                group_id: UNGROUPED,
                position,
                velocity,
                heading: velocity.heading(),
                energy,
                age,
                state: AgentState::Wander,
                alive: true,
                stress: 0.0,
                group_lonely_seconds: 0.0,
                group_cooldown: 0.0,
                wander_dir,
                wander_time,
                last_desired: velocity,
                last_sensed_danger: false,
                traits,
                traits_dirty: false,
                appearance_h: appearance.base_h,
                appearance_s: appearance.base_s,
                appearance_l: appearance.base_l,
            });
        }
    }

    fn sample_initial_traits(&mut self) -> AgentTraits {
        let clamp = self.config.evolution.clamp.clone();
        AgentTraits {
            speed: sample_trait_range(&mut self.trait_rng, clamp.speed),
            metabolism: sample_trait_range(&mut self.trait_rng, clamp.metabolism),
            disease_resistance: sample_trait_range(&mut self.trait_rng, clamp.disease_resistance),
            fertility: sample_trait_range(&mut self.trait_rng, clamp.fertility),
            sociality: sample_trait_range(&mut self.trait_rng, clamp.sociality),
            territoriality: sample_trait_range(&mut self.trait_rng, clamp.territoriality),
            loyalty: sample_trait_range(&mut self.trait_rng, clamp.loyalty),
            founder: sample_trait_range(&mut self.trait_rng, clamp.founder),
            kin_bias: sample_trait_range(&mut self.trait_rng, clamp.kin_bias),
        }
    }

    fn sample_initial_age(&mut self) -> f64 {
        let species = &self.config.species;
        let min_age = species.initial_age_min.max(0.0);
        let default_max = species.adult_age.min(species.max_age * 0.5);
        let configured_max = if species.initial_age_max > 0.0 {
            species.initial_age_max
        } else {
            default_max
        };
        let max_age = configured_max.min(species.max_age).max(0.0);
        let (low, high) = if max_age < min_age {
            (max_age, min_age)
        } else {
            (min_age, max_age)
        };
        self.rng.next_range(low, high)
    }

    fn refresh_vision_cache(&mut self) {
        let vision_radius = self.config.species.vision_radius;
        self.vision_radius_sq = vision_radius * vision_radius;
        self.vision_cell_offsets = self.grid.build_neighbor_cell_offsets(vision_radius);
    }

    fn apply_births(&mut self) {
        self.agents.append(&mut self.birth_queue);
    }

    fn remove_dead(&mut self) -> u32 {
        let before = self.agents.len();
        self.agents.retain(|agent| agent.alive);
        (before - self.agents.len()) as u32
    }

    pub(crate) fn compute_size(&self, agent: &Agent) -> f64 {
        let maturity = (agent.age / self.config.species.adult_age.max(1e-5)).min(1.0);
        let energy_factor = (agent.energy
            / self.config.species.reproduction_energy_threshold.max(1e-5))
        .min(1.0);
        (0.4 + 0.4 * maturity + 0.2 * energy_factor).clamp(0.1, 1.0)
    }

    fn agent_snapshot(&self, agent: &Agent) -> AgentSnapshot {
        AgentSnapshot {
            id: agent.id,
            x: agent.position.x,
            y: agent.position.y,
            vx: agent.velocity.x,
            vy: agent.velocity.y,
            group: agent.group_id,
            behavior_state: agent.state.as_str().to_string(),
            phase: if agent.alive { "loop" } else { "end" }.to_string(),
            age: agent.age,
            energy: agent.energy,
            size: self.compute_size(agent),
            is_alive: agent.alive,
            speed: agent.velocity.length(),
            heading: agent.heading,
            lineage_id: agent.lineage_id,
            generation: agent.generation,
            trait_speed: agent.traits.speed,
            appearance_seed: agent.id,
            appearance_h: agent.appearance_h,
            appearance_s: agent.appearance_s,
            appearance_l: agent.appearance_l,
            importance: 1.0,
        }
    }

    fn state_metrics(&self, tick: u64) -> TickMetrics {
        let mut stats = PopulationStats::default();
        let mut group_ids = BTreeSet::new();
        for agent in &self.agents {
            if !agent.alive {
                continue;
            }
            stats.population += 1;
            stats.energy_sum += agent.energy;
            stats.age_sum += agent.age;
            if agent.group_id == UNGROUPED {
                stats.ungrouped += 1;
            } else {
                group_ids.insert(agent.group_id);
            }
        }
        stats.groups = group_ids.len();
        metrics_system::create_metrics(tick, 0, 0, 0, 0.0, stats)
    }

    /// Mirrors the position across each violated edge, negating the
    /// matching velocity component, until the point is inside.
    /// Non-finite coordinates cannot converge here; they are clamped
    /// (with a debug assertion) instead of looping.
    fn reflect(
        mut x: f64,
        mut y: f64,
        mut vx: f64,
        mut vy: f64,
        world_size: f64,
    ) -> (f64, f64, f64, f64) {
        debug_assert!(
            x.is_finite() && y.is_finite(),
            "non-finite position entering boundary reflection"
        );
        if !x.is_finite() {
            x = x.clamp(0.0, world_size);
            if !x.is_finite() {
                x = 0.0;
            }
            vx = 0.0;
        }
        if !y.is_finite() {
            y = y.clamp(0.0, world_size);
            if !y.is_finite() {
                y = 0.0;
            }
            vy = 0.0;
        }
        loop {
            let mut crossed = false;
            if x < 0.0 {
                x = -x;
                vx = -vx;
                crossed = true;
            }
            if x > world_size {
                x = 2.0 * world_size - x;
                vx = -vx;
                crossed = true;
            }
            if y < 0.0 {
                y = -y;
                vy = -vy;
                crossed = true;
            }
            if y > world_size {
                y = 2.0 * world_size - y;
                vy = -vy;
                crossed = true;
            }
            if !crossed {
                break;
            }
        }
        (x, y, vx, vy)
    }
}

fn sample_trait_range(trait_rng: &mut DeterministicRng, bounds: (f64, f64)) -> f64 {
    let (mut low, mut high) = bounds;
    if high < low {
        std::mem::swap(&mut low, &mut high);
    }
    trait_rng.next_range(low, high)
}

fn mutate_gene(
    rng: &mut DeterministicRng,
    value: &mut f64,
    chance: f64,
    strength: f64,
    weight: f64,
) {
    if rng.next_float() < chance {
        *value += rng.next_range(-strength, strength) * weight;
    }
}

fn wrap_hue(value: f64) -> f64 {
    value.rem_euclid(360.0)
}

fn circular_mean_deg(first: f64, second: f64) -> f64 {
    let x = first.to_radians().cos() + second.to_radians().cos();
    let y = first.to_radians().sin() + second.to_radians().sin();
    if x.abs() < 1e-8 && y.abs() < 1e-8 {
        return ((first + second) * 0.5).rem_euclid(360.0);
    }
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic_config(seed: u64, initial_population: usize) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.seed = seed;
        config.initial_population = initial_population;
        config
    }

    #[test]
    fn test_empty_world_steps_cleanly() {
        let mut config = SimulationConfig::default();
        config.seed = 31;
        config.initial_population = 0;
        config.time_step = 1.0;
        config.species.base_speed = 0.0;
        config.species.vision_radius = 0.0;
        let mut world = World::new(config).expect("config is valid");
        let metrics = world.step(0);
        assert_eq!(metrics.population, 0);
        assert_eq!(metrics.groups, 0);
        assert_eq!(metrics.ungrouped, 0);
        assert_eq!(metrics.average_energy, 0.0);
        assert_eq!(metrics.average_age, 0.0);
        assert!(world.snapshot(1).agents.is_empty());
    }

    #[test]
    fn test_identical_seeds_reproduce_metrics_and_snapshots() {
        let mut a = World::new(deterministic_config(7, 60)).expect("config is valid");
        let mut b = World::new(deterministic_config(7, 60)).expect("config is valid");
        for tick in 0..25 {
            let ma = a.step(tick);
            let mb = b.step(tick);
            assert_eq!(ma.deterministic_fields(), mb.deterministic_fields());
        }
        let sa = a.snapshot(25);
        let sb = b.snapshot(25);
        assert_eq!(sa.agents, sb.agents);
        assert_eq!(sa.fields, sb.fields);
        assert_eq!(
            sa.metrics.deterministic_fields(),
            sb.metrics.deterministic_fields()
        );
    }

    #[test]
    fn test_reset_restores_the_original_run() {
        let mut world = World::new(deterministic_config(11, 40)).expect("config is valid");
        let first: Vec<_> = (0..20)
            .map(|tick| world.step(tick).deterministic_fields())
            .collect();
        world.reset();
        let second: Vec<_> = (0..20)
            .map(|tick| world.step(tick).deterministic_fields())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_positions_stay_inside_world() {
        let mut world = World::new(deterministic_config(3, 50)).expect("config is valid");
        for tick in 0..50 {
            world.step(tick);
            let size = world.config().world_size;
            for agent in world.agents() {
                assert!((0.0..=size).contains(&agent.position.x));
                assert!((0.0..=size).contains(&agent.position.y));
            }
        }
    }

    #[test]
    fn test_population_never_exceeds_max() {
        let mut config = deterministic_config(5, 30);
        config.max_population = 35;
        config.feedback.reproduction_base_chance = 1.0;
        config.species.initial_age_max = 30.0;
        let mut world = World::new(config).expect("config is valid");
        for tick in 0..100 {
            world.step(tick);
            assert!(world.population() <= 35);
        }
    }

    #[test]
    fn test_reflection_preserves_inside_invariant() {
        // Crossing the far wall and beyond in one step.
        let (x, y, vx, vy) = World::reflect(40.0, -30.0, 35.0, -35.0, 10.0);
        assert!((0.0..=10.0).contains(&x));
        assert!((0.0..=10.0).contains(&y));
        assert_eq!(vx.abs(), 35.0);
        assert_eq!(vy.abs(), 35.0);
    }

    #[test]
    fn test_fast_agent_reflects_within_one_step() {
        let mut config = deterministic_config(1, 0);
        config.world_size = 10.0;
        config.time_step = 1.0;
        config.species.base_speed = 50.0;
        config.species.max_acceleration = 0.0;
        config.boundary_margin = 0.0;
        config.feedback.base_death_probability_per_second = 0.0;
        config.feedback.age_death_probability_per_second = 0.0;
        let mut world = World::new(config).expect("config is valid");
        let id = world.allocate_agent_id();
        let lineage = world.allocate_lineage();
        world.agents.push(Agent {
            id,
            lineage_id: lineage,
            position: Vec2::new(5.0, 5.0),
            velocity: Vec2::new(35.0, -35.0),
            energy: 50.0,
            traits_dirty: false,
            ..Agent::default()
        });
        world.step(0);
        let agent = &world.agents()[0];
        assert!((0.0..=10.0).contains(&agent.position.x));
        assert!((0.0..=10.0).contains(&agent.position.y));
        // Odd number of crossings on each axis flips the sign.
        assert!(agent.velocity.x < 0.0);
        assert!(agent.velocity.y > 0.0);
    }

    #[test]
    fn test_agent_in_margin_gains_inward_velocity() {
        let mut config = deterministic_config(13, 0);
        config.feedback.base_death_probability_per_second = 0.0;
        config.feedback.age_death_probability_per_second = 0.0;
        config.feedback.density_death_probability_per_neighbor_per_second = 0.0;
        let mut world = World::new(config).expect("config is valid");
        let id = world.allocate_agent_id();
        let lineage = world.allocate_lineage();
        world.agents.push(Agent {
            id,
            lineage_id: lineage,
            position: Vec2::new(1.0, 50.0),
            velocity: Vec2::ZERO,
            energy: 10.0,
            traits_dirty: false,
            ..Agent::default()
        });
        world.step(0);
        let agent = &world.agents()[0];
        assert!(agent.velocity.x > 0.0, "boundary push points inward");
    }

    #[test]
    fn test_climate_multiplier_respects_bounds() {
        let mut config = deterministic_config(17, 10);
        config.environment.food_regen_noise_amplitude = 0.5;
        config.environment.food_regen_noise_interval_seconds = 0.2;
        config.environment.food_regen_noise_smooth_seconds = 0.1;
        let mut world = World::new(config).expect("config is valid");
        for tick in 0..200 {
            world.step(tick);
            assert!((0.5..=1.5).contains(&world.climate.multiplier));
        }
    }

    #[test]
    fn test_group_bases_subset_of_live_groups() {
        let mut config = deterministic_config(23, 80);
        config.feedback.group_formation_neighbor_threshold = 1;
        config.feedback.group_formation_chance = 0.5;
        config.feedback.group_split_chance = 0.2;
        config.feedback.group_split_chance_max = 0.5;
        config.feedback.group_split_neighbor_threshold = 2;
        config.feedback.group_split_stress_threshold = 0.0;
        let mut world = World::new(config).expect("config is valid");
        for tick in 0..60 {
            world.step(tick);
            let live: BTreeSet<i32> = world
                .agents()
                .iter()
                .filter(|agent| agent.alive && agent.group_id != UNGROUPED)
                .map(|agent| agent.group_id)
                .collect();
            for group_id in world.group_bases.keys() {
                assert!(
                    live.contains(group_id),
                    "base for extinct group {group_id} survived the tick"
                );
            }
        }
    }

    #[test]
    fn test_snapshot_serializes_and_round_trips() {
        let mut world = World::new(deterministic_config(29, 20)).expect("config is valid");
        for tick in 0..10 {
            world.step(tick);
        }
        let snapshot = world.snapshot(10);
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let parsed: Snapshot = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, snapshot);
        for agent in &snapshot.agents {
            assert_eq!(agent.appearance_seed, agent.id);
            assert_eq!(agent.importance, 1.0);
            assert_eq!(agent.phase, "loop");
            assert!(agent.is_alive);
            assert!((0.1..=1.0).contains(&agent.size));
        }
    }

    #[test]
    fn test_snapshot_before_first_step_uses_state_metrics() {
        let world = World::new(deterministic_config(41, 15)).expect("config is valid");
        let snapshot = world.snapshot(0);
        assert_eq!(snapshot.metrics.population, 15);
        assert_eq!(snapshot.metrics.births, 0);
        assert_eq!(snapshot.agents.len(), 15);
        assert_eq!(snapshot.metadata.seed, 41);
        assert_eq!(snapshot.metadata.tick_rate, 1.0 / 0.02);
    }

    #[test]
    fn test_bootstrap_assigns_unique_ids_and_lineages() {
        let world = World::new(deterministic_config(2, 50)).expect("config is valid");
        let ids: BTreeSet<u64> = world.agents().iter().map(|agent| agent.id).collect();
        let lineages: BTreeSet<u64> =
            world.agents().iter().map(|agent| agent.lineage_id).collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(lineages.len(), 50);
        for agent in world.agents() {
            assert_eq!(agent.group_id, UNGROUPED);
            assert!(agent.energy > 0.0);
            assert!(agent.age >= 0.0);
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let mut config = SimulationConfig::default();
        config.cell_size = -1.0;
        assert!(World::new(config).is_err());
    }

    #[test]
    fn test_circular_mean_wraps_across_zero() {
        let mean = circular_mean_deg(350.0, 10.0);
        assert!(mean < 1e-9 || (mean - 360.0).abs() < 1e-9);
        let plain = circular_mean_deg(40.0, 60.0);
        assert!((plain - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_hue_handles_negatives() {
        assert_eq!(wrap_hue(-20.0), 340.0);
        assert_eq!(wrap_hue(380.0), 20.0);
    }

    #[test]
    fn test_neighbor_checks_counts_pairs() {
        let mut config = deterministic_config(4, 0);
        config.feedback.base_death_probability_per_second = 0.0;
        config.feedback.age_death_probability_per_second = 0.0;
        config.feedback.density_death_probability_per_neighbor_per_second = 0.0;
        let mut world = World::new(config).expect("config is valid");
        for position in [Vec2::new(50.0, 50.0), Vec2::new(51.0, 50.0)] {
            let id = world.allocate_agent_id();
            let lineage = world.allocate_lineage();
            world.agents.push(Agent {
                id,
                lineage_id: lineage,
                position,
                energy: 10.0,
                traits_dirty: false,
                ..Agent::default()
            });
        }
        let metrics = world.step(0);
        // Each of the two agents sees the other once.
        assert_eq!(metrics.neighbor_checks, 2);
    }
}
