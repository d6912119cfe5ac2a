//! Per-agent lifecycle: metabolism, stress and disease, feeding, pair
//! reproduction with inheritance, and hazard mortality.
//!
//! Deaths leave a food deposit at the agent's cell via the pending-event
//! buffer; births are enqueued and appended to the population after the
//! per-agent pass.

use crate::environment::CellKey;
use crate::spatial_grid::NeighborScratch;
use crate::systems::groups;
use crate::world::World;
use terrarium_data::{Agent, AgentState, AgentTraits, Vec2, UNGROUPED};

/// Possibly reseeds or mutates the child's group at birth, founding a
/// new group (and base) with a founder-scaled probability.
pub fn mutate_group(
    world: &mut World,
    group_id: i32,
    can_create_groups: bool,
    position: Vec2,
    traits: &AgentTraits,
) -> i32 {
    if !can_create_groups {
        return group_id;
    }
    let founder = world.clamp_traits(*traits).founder.max(0.0);
    if group_id == UNGROUPED {
        if world.rng.next_float()
            < (world.config.feedback.group_birth_seed_chance * founder).min(1.0)
        {
            let new_group = world.allocate_group();
            groups::register_group_base(world, new_group, position);
            return new_group;
        }
        return UNGROUPED;
    }
    if world.rng.next_float() < (world.config.feedback.group_mutation_chance * founder).min(1.0) {
        let new_group = world.allocate_group();
        groups::register_group_base(world, new_group, position);
        return new_group;
    }
    group_id
}

/// Applies one tick of lifecycle to `agent` and returns the number of
/// births added (0 or 1). A death from any source deposits
/// `food_from_death` at the agent's cell and short-circuits.
#[allow(clippy::too_many_arguments)]
pub fn apply_life_cycle(
    world: &mut World,
    agent: &mut Agent,
    scratch: &NeighborScratch,
    neighbor_count: u32,
    same_group_neighbors: u32,
    can_create_groups: bool,
    traits: &AgentTraits,
    base_cell_key: CellKey,
) -> u32 {
    let dt = world.config.time_step;
    let mut births_added = 0u32;

    let metabolism_multiplier = world.trait_metabolism_multiplier(traits);
    let speed_cost = agent.velocity.length() * 0.05 * metabolism_multiplier;
    let mut metabolism =
        (world.config.species.metabolism_per_second * metabolism_multiplier + speed_cost) * dt;
    let excess_energy = (agent.energy - world.config.species.energy_soft_cap).max(0.0);
    metabolism += excess_energy
        * world.config.species.high_energy_metabolism_slope
        * dt
        * metabolism_multiplier;
    let stress_drain =
        f64::from(neighbor_count) * world.config.feedback.stress_drain_per_neighbor * dt;
    agent.energy -= metabolism + stress_drain + agent.stress * dt;

    if neighbor_count > world.config.feedback.local_density_soft_cap {
        agent.stress += 0.1 * dt;
        let disease_resistance = world.trait_disease_resistance(traits);
        let disease_risk = f64::from(neighbor_count)
            * world.config.feedback.disease_probability_per_neighbor
            * dt
            / disease_resistance.max(0.1);
        if world.rng.next_float() < disease_risk {
            agent.alive = false;
            *world.pending_food.entry(base_cell_key).or_insert(0.0) +=
                world.config.environment.food_from_death;
            return births_added;
        }
    } else {
        agent.stress = (agent.stress - 0.05 * dt).max(0.0);
    }

    let max_consumption = world.config.environment.food_consumption_rate * dt;
    if max_consumption > 0.0 {
        let available = world.environment.sample_food(base_cell_key);
        if available > 0.0 {
            let consumed = available.min(max_consumption);
            world.environment.consume_food(base_cell_key, consumed);
            agent.energy += consumed;
        }
    }

    let allow_reproduction = world.config.initial_population >= 10;
    if allow_reproduction
        && agent.energy > world.config.species.reproduction_energy_threshold
        && agent.age > world.config.species.adult_age
        && world.agents.len() + world.birth_queue.len() < world.config.max_population
        && !world.paired_ids.contains(&agent.id)
    {
        if let Some(mate_index) = find_mate(world, scratch) {
            births_added += try_reproduce(
                world,
                agent,
                mate_index,
                neighbor_count,
                same_group_neighbors,
                can_create_groups,
                traits,
                base_cell_key,
            );
        }
    }

    let hazard_per_second = world.config.feedback.base_death_probability_per_second
        + agent.age * world.config.feedback.age_death_probability_per_second
        + f64::from(neighbor_count)
            * world
                .config
                .feedback
                .density_death_probability_per_neighbor_per_second;
    let hazard_chance = (hazard_per_second * dt).min(1.0);
    if hazard_chance > 0.0 && world.rng.next_float() < hazard_chance {
        agent.alive = false;
        *world.pending_food.entry(base_cell_key).or_insert(0.0) +=
            world.config.environment.food_from_death;
        return births_added;
    }

    if agent.energy <= 0.0 || agent.age >= world.config.species.max_age {
        agent.alive = false;
        *world.pending_food.entry(base_cell_key).or_insert(0.0) +=
            world.config.environment.food_from_death;
    }
    births_added
}

/// Nearest eligible mate in vision radius, scanned in stable neighbor
/// order with ties broken by the lower agent id.
fn find_mate(world: &World, scratch: &NeighborScratch) -> Option<usize> {
    let mate_radius_sq = world.config.species.vision_radius * world.config.species.vision_radius;
    let threshold = world.config.species.reproduction_energy_threshold;
    let adult_age = world.config.species.adult_age;
    let mut mate_index: Option<usize> = None;
    let mut mate_dist_sq = 0.0;
    for k in 0..scratch.len() {
        let dist_sq = scratch.dist_sq[k];
        if dist_sq > mate_radius_sq {
            continue;
        }
        let index = scratch.indices[k];
        let other = &world.agents[index];
        if !other.alive || world.paired_ids.contains(&other.id) {
            continue;
        }
        if other.energy <= threshold || other.age <= adult_age {
            continue;
        }
        let better = match mate_index {
            None => true,
            Some(current) => {
                dist_sq < mate_dist_sq
                    || (dist_sq == mate_dist_sq && other.id < world.agents[current].id)
            }
        };
        if better {
            mate_index = Some(index);
            mate_dist_sq = dist_sq;
        }
    }
    mate_index
}

#[allow(clippy::too_many_arguments)]
fn try_reproduce(
    world: &mut World,
    agent: &mut Agent,
    mate_index: usize,
    neighbor_count: u32,
    same_group_neighbors: u32,
    can_create_groups: bool,
    traits: &AgentTraits,
    base_cell_key: CellKey,
) -> u32 {
    let feedback = &world.config.feedback;
    let mut density_factor = 1.0;
    if neighbor_count > feedback.local_density_soft_cap {
        let excess = f64::from(neighbor_count - feedback.local_density_soft_cap);
        let drop = excess * feedback.density_reproduction_slope;
        density_factor = (feedback.density_reproduction_penalty - drop).clamp(0.0, 1.0);
    }
    let mut group_factor = 1.0;
    if agent.group_id != UNGROUPED {
        let penalty =
            f64::from(same_group_neighbors) * feedback.group_reproduction_penalty_per_ally;
        group_factor = (1.0 - penalty).max(feedback.group_reproduction_min_factor);
    }
    let base_reproduction = feedback.reproduction_base_chance.max(0.0);

    let mate_traits = {
        let mate = &world.agents[mate_index];
        if mate.traits_dirty {
            world.clamp_traits(mate.traits)
        } else {
            mate.traits
        }
    };
    let trait_factor = (world.trait_reproduction_factor(traits)
        * world.trait_reproduction_factor(&mate_traits))
    .sqrt();
    let reproduction_chance =
        (base_reproduction * density_factor * group_factor * trait_factor).clamp(0.0, 1.0);
    if world.rng.next_float() >= reproduction_chance {
        return 0;
    }

    world.paired_ids.insert(agent.id);
    let mate_id = world.agents[mate_index].id;
    world.paired_ids.insert(mate_id);

    // Both parents pay a quarter of their own energy plus half of the
    // birth cost; the child starts with the pooled quarters.
    let mate_energy = world.agents[mate_index].energy;
    let child_energy = agent.energy * 0.25 + mate_energy * 0.25;
    let birth_cost_half = world.config.species.birth_energy_cost * 0.5;
    agent.energy -= agent.energy * 0.25 + birth_cost_half;
    world.agents[mate_index].energy -= mate_energy * 0.25 + birth_cost_half;

    let mate_group = world.agents[mate_index].group_id;
    let base_group = world.inherit_group_pair(agent.group_id, mate_group);
    let child_traits = world.inherit_traits_pair(traits, &mate_traits);
    let child_group = mutate_group(
        world,
        base_group,
        can_create_groups,
        agent.position,
        &child_traits,
    );
    if base_group == UNGROUPED && child_group != UNGROUPED {
        let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
        if agent.group_id == UNGROUPED {
            groups::assign_group(agent, child_group, merge_cooldown);
        }
        if world.agents[mate_index].group_id == UNGROUPED {
            groups::set_group_by_index(world, mate_index, child_group);
        }
    }
    let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
    let child_cooldown = if child_group != UNGROUPED && merge_cooldown > 0.0 {
        merge_cooldown
    } else {
        0.0
    };
    let spawn_distance = world.config.feedback.min_separation_distance.max(0.5);

    let (mate_lineage, mate_h, mate_s, mate_l, mate_velocity, mate_position, mate_generation) = {
        let mate = &world.agents[mate_index];
        (
            mate.lineage_id,
            mate.appearance_h,
            mate.appearance_s,
            mate.appearance_l,
            mate.velocity,
            mate.position,
            mate.generation,
        )
    };
    let child_lineage = world.inherit_lineage_pair(agent.lineage_id, mate_lineage);
    let (child_h, child_s, child_l) = world.inherit_appearance_pair(
        (agent.appearance_h, agent.appearance_s, agent.appearance_l),
        (mate_h, mate_s, mate_l),
        child_group,
    );
    let child_velocity =
        ((agent.velocity + mate_velocity) * 0.5).clamp_length(world.trait_speed_limit(&child_traits));
    let spawn_center = (agent.position + mate_position) * 0.5;
    let child_position = spawn_center + world.rng.next_unit_circle() * spawn_distance;

    let child = Agent {
        id: world.allocate_agent_id(),
        generation: agent.generation.max(mate_generation) + 1,
        lineage_id: child_lineage,
        group_id: child_group,
        position: child_position,
        velocity: child_velocity,
        heading: child_velocity.heading(),
        energy: child_energy,
        age: 0.0,
        state: AgentState::Wander,
        alive: true,
        stress: 0.0,
        group_lonely_seconds: 0.0,
        group_cooldown: child_cooldown,
        wander_dir: Vec2::ZERO,
        wander_time: 0.0,
        last_desired: child_velocity,
        last_sensed_danger: false,
        traits: child_traits,
        traits_dirty: false,
        appearance_h: child_h,
        appearance_s: child_s,
        appearance_l: child_l,
    };
    world.birth_queue.push(child);
    if child_group != UNGROUPED {
        *world
            .pending_pheromone
            .entry((base_cell_key, child_group))
            .or_insert(0.0) += world.config.environment.pheromone_deposit_on_birth;
    }
    1
}
