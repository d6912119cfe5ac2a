//! Steering composition.
//!
//! Produces a desired velocity for one agent from its neighbors, the
//! environment fields, and the configured weights. Flee dominates when
//! danger or intergroup pressure is present; otherwise one of
//! seek-food / seek-mate / wander is selected and the additive biases
//! (personal space, separation, alignment, cohesion, base attraction,
//! boundary avoidance) are layered on top.

use crate::config::{FeedbackConfig, SimulationConfig};
use crate::environment::CellKey;
use crate::spatial_grid::NeighborScratch;
use crate::systems::fields;
use crate::world::World;
use terrarium_data::{Agent, AgentState, AgentTraits, Vec2, UNGROUPED};

/// Computes the desired velocity and whether the agent sensed danger.
pub fn compute_desired_velocity(
    world: &mut World,
    agent: &mut Agent,
    scratch: &NeighborScratch,
    base_speed: f64,
    traits: &AgentTraits,
    danger_present: bool,
    base_cell_key: CellKey,
) -> (Vec2, bool) {
    let mut desired = Vec2::ZERO;
    let mut flee_vector = Vec2::ZERO;
    let mut sensed_danger = false;
    let sociality = traits.sociality.max(0.0);
    let territoriality = traits.territoriality.max(0.0);

    let mut danger_level = 0.0;
    let mut danger_gradient = Vec2::ZERO;
    if danger_present {
        danger_level = world.environment.sample_danger(base_cell_key);
        danger_gradient = fields::danger_gradient(&world.environment, base_cell_key);
    }
    if danger_level > 0.1 {
        sensed_danger = true;
        if danger_gradient.length_squared() < 1e-4 {
            danger_gradient = world.rng.next_unit_circle();
        }
        if danger_gradient.length_squared() > 1e-12 {
            danger_gradient = danger_gradient.normalized_or_zero();
            let flee_scale = base_speed * danger_level.min(1.0);
            flee_vector -= danger_gradient * flee_scale;
        }
    }

    for k in 0..scratch.len() {
        let other_group = world.agents[scratch.indices[k]].group_id;
        let groups_differ = agent.group_id != UNGROUPED
            && other_group != UNGROUPED
            && other_group != agent.group_id;
        let dist_sq = scratch.dist_sq[k];
        if groups_differ && dist_sq < 4.0 && dist_sq > 1e-12 {
            let inv_len = 1.0 / dist_sq.sqrt();
            flee_vector -= scratch.offsets[k] * (inv_len * base_speed);
            sensed_danger = true;
        }
    }

    if flee_vector.length_squared() > 1e-3 {
        agent.state = AgentState::Flee;
        let mut flee_strength = 1.0_f64;
        if danger_present {
            flee_strength = flee_strength.max(danger_level.min(1.0));
        }
        desired = flee_vector;
        if agent.group_id != UNGROUPED && !scratch.is_empty() {
            let cohesion_bias = group_cohesion(world, agent, scratch);
            let alignment_bias = alignment(world, agent, scratch);
            let separation_bias = separation(world, agent, scratch);
            let keep = (1.0 - 0.7 * flee_strength).max(0.0);
            desired += cohesion_bias * (base_speed * 0.8 * keep);
            desired += alignment_bias * (base_speed * 0.5 * keep);
            desired += separation_bias * (base_speed * 0.7);
        }
        let (boundary_bias, _) = boundary_avoidance(&world.config, agent.position);
        desired += boundary_bias * (base_speed * world.config.boundary_avoidance_weight);
        return (desired, sensed_danger);
    }

    let food_here = world.environment.sample_food(base_cell_key);
    let pheromone_gradient = if agent.group_id == UNGROUPED {
        Vec2::ZERO
    } else {
        fields::pheromone_gradient(&world.environment, agent.group_id, base_cell_key)
    };
    let grouped = agent.group_id != UNGROUPED;

    let feedback = world.config.feedback.clone();
    let (personal_space_bias, separation_bias, intergroup_bias, group_cohesion_bias, alignment_bias) =
        if scratch.is_empty() {
            (Vec2::ZERO, Vec2::ZERO, Vec2::ZERO, Vec2::ZERO, Vec2::ZERO)
        } else {
            let personal = if feedback.personal_space_weight > 0.0
                && feedback.personal_space_radius > 1e-6
            {
                personal_space(&feedback, scratch)
            } else {
                Vec2::ZERO
            };
            let separation_bias = if feedback.ally_separation_weight > 0.0
                || feedback.other_group_separation_weight > 0.0
                || feedback.min_separation_weight > 0.0
            {
                separation(world, agent, scratch)
            } else {
                Vec2::ZERO
            };
            let intergroup = if grouped
                && territoriality > 1e-6
                && feedback.other_group_avoid_weight > 0.0
                && feedback.other_group_avoid_radius > 1e-6
            {
                intergroup_avoidance(world, agent, scratch)
            } else {
                Vec2::ZERO
            };
            let cohesion_bias = if grouped
                && sociality > 1e-6
                && feedback.group_cohesion_weight > 0.0
                && feedback.ally_cohesion_weight > 0.0
                && feedback.group_cohesion_radius > 1e-6
            {
                group_cohesion(world, agent, scratch)
            } else {
                Vec2::ZERO
            };
            let alignment_bias = if grouped && sociality > 1e-6 {
                alignment(world, agent, scratch)
            } else {
                Vec2::ZERO
            };
            (personal, separation_bias, intergroup, cohesion_bias, alignment_bias)
        };
    let group_seek_bias_vec =
        if !grouped && feedback.group_seek_weight > 0.0 && feedback.group_seek_radius > 1e-6 {
            group_seek_bias(world, agent, scratch)
        } else {
            Vec2::ZERO
        };
    let base_bias = if grouped && feedback.group_base_attraction_weight > 0.0 {
        group_base_attraction(world, agent)
    } else {
        Vec2::ZERO
    };

    let pheromone_bias = if pheromone_gradient.length_squared() > 1e-4 {
        pheromone_gradient.normalized_or_zero()
    } else {
        Vec2::ZERO
    };
    let danger_bias = if danger_gradient.length_squared() > 1e-4 {
        danger_gradient.normalized_or_zero()
    } else {
        Vec2::ZERO
    };

    let reproduction_threshold = world.config.species.reproduction_energy_threshold;
    let adult_age = world.config.species.adult_age;
    let needs_food = agent.energy < reproduction_threshold * 0.6
        || food_here > world.config.environment.food_per_cell * 0.5;
    if needs_food {
        let mut food_gradient = fields::food_gradient(&world.environment, base_cell_key);
        if food_gradient.length_squared() > 1e-4 {
            food_gradient = food_gradient.normalized_or_zero();
        }
        agent.state = AgentState::SeekingFood;
        desired += food_gradient * (base_speed * 0.4);
        let wander = wander_direction(world, agent);
        desired += wander * (base_speed * 0.25);
    } else if agent.energy > reproduction_threshold && agent.age > adult_age {
        agent.state = AgentState::SeekingMate;
        let cohesion_all = cohesion(&scratch.offsets);
        desired += cohesion_all * (base_speed * 0.8);
        desired += pheromone_bias * (base_speed * 0.25);
    } else {
        agent.state = AgentState::Wander;
        let jitter = world.config.species.wander_jitter;
        let wander = wander_direction(world, agent);
        desired += wander * (base_speed * jitter);
        desired += pheromone_bias * (base_speed * 0.15);
    }

    desired += personal_space_bias * (base_speed * feedback.personal_space_weight);
    desired += intergroup_bias * (base_speed * feedback.other_group_avoid_weight * territoriality);
    desired += group_seek_bias_vec * (base_speed * feedback.group_seek_weight);
    desired += separation_bias * (base_speed * 1.4);
    desired += alignment_bias * (base_speed * 0.3 * sociality);
    desired += group_cohesion_bias
        * (base_speed * feedback.group_cohesion_weight * feedback.ally_cohesion_weight * sociality);
    desired += base_bias * (base_speed * feedback.group_base_attraction_weight);

    let (boundary_bias, boundary_proximity) = boundary_avoidance(&world.config, agent.position);
    desired += boundary_bias * (base_speed * world.config.boundary_avoidance_weight);
    let boundary_len_sq = boundary_bias.length_squared();
    let desired_len_sq = desired.length_squared();
    if boundary_proximity > 0.0 && boundary_len_sq > 1e-8 && desired_len_sq > 1e-8 {
        let turn = (boundary_proximity * world.config.boundary_turn_weight).min(1.0);
        let inward = boundary_bias * base_speed;
        desired += (inward - desired) * turn;
    }
    desired -= danger_bias * (base_speed * 0.2);

    (desired, sensed_danger)
}

/// Inverse-square repulsion from every neighbor, with an extra quadratic
/// push inside the minimum separation distance. The accumulated vector is
/// length-clamped and boosted when the closest neighbor is inside min-sep.
pub fn separation(world: &World, agent: &Agent, scratch: &NeighborScratch) -> Vec2 {
    if scratch.is_empty() {
        return Vec2::ZERO;
    }
    let feedback = &world.config.feedback;
    let min_sep = feedback.min_separation_distance.max(0.0);
    let min_sep_sq = min_sep * min_sep;
    let min_sep_weight = feedback.min_separation_weight.max(0.0);
    let ally_weight = feedback.ally_separation_weight;
    let other_weight = feedback.other_group_separation_weight;

    let mut accum = Vec2::ZERO;
    let mut closest_dist_sq = f64::INFINITY;
    for k in 0..scratch.len() {
        let raw_dist_sq = scratch.dist_sq[k];
        if raw_dist_sq < closest_dist_sq {
            closest_dist_sq = raw_dist_sq;
        }
        let dist_sq = raw_dist_sq.max(0.1);
        let other_group = world.agents[scratch.indices[k]].group_id;
        let same_group = agent.group_id != UNGROUPED && other_group == agent.group_id;
        let weight = if same_group { ally_weight } else { other_weight };
        let offset = scratch.offsets[k];
        accum -= offset * (weight / dist_sq);
        if min_sep_weight > 0.0
            && min_sep_sq > 1e-12
            && raw_dist_sq > 1e-12
            && raw_dist_sq < min_sep_sq
        {
            let strength = ((min_sep_sq - raw_dist_sq) / min_sep_sq).clamp(0.0, 1.0);
            let inv_len = 1.0 / raw_dist_sq.sqrt();
            accum -= offset * (inv_len * strength * strength * min_sep_weight);
        }
    }
    if accum.length_squared() < 1e-12 {
        return Vec2::ZERO;
    }
    if closest_dist_sq.is_finite() && closest_dist_sq > 1e-12 && min_sep > 1e-6 {
        let closest = closest_dist_sq.sqrt();
        if closest < min_sep {
            let scale = (min_sep / closest.max(1e-4)).clamp(1.0, 4.0);
            accum = accum * scale;
        }
    }
    accum.clamp_length(3.5)
}

/// Pushes the position out of overlaps with neighbors closer than the
/// minimum separation distance, averaged and clamped to half of min-sep.
pub fn resolve_overlap(min_separation: f64, position: &mut Vec2, scratch: &NeighborScratch) {
    let min_sep = min_separation.max(0.0);
    if min_sep <= 1e-6 || scratch.is_empty() {
        return;
    }
    let min_sep_sq = min_sep * min_sep;
    let mut correction = Vec2::ZERO;
    let mut count = 0u32;
    for k in 0..scratch.len() {
        let dist_sq = scratch.dist_sq[k];
        if dist_sq <= 1e-12 || dist_sq >= min_sep_sq {
            continue;
        }
        let dist = dist_sq.sqrt();
        let overlap = min_sep - dist;
        if overlap <= 0.0 {
            continue;
        }
        correction -= scratch.offsets[k] * (overlap / dist);
        count += 1;
    }
    if count == 0 {
        return;
    }
    correction = (correction * (1.0 / f64::from(count))).clamp_length(min_sep * 0.5);
    *position += correction;
}

/// Normalized mean velocity of same-group neighbors.
pub fn alignment(world: &World, agent: &Agent, scratch: &NeighborScratch) -> Vec2 {
    if agent.group_id == UNGROUPED {
        return Vec2::ZERO;
    }
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for &index in &scratch.indices {
        let other = &world.agents[index];
        if other.group_id != agent.group_id {
            continue;
        }
        sum += other.velocity;
        count += 1;
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (sum * (1.0 / f64::from(count))).normalized_or_zero()
}

/// Direction for an ungrouped agent toward nearby group structure: the
/// nearest known base within the seek radius blended with offsets toward
/// grouped neighbors, each weighted by linear falloff.
pub fn group_seek_bias(world: &World, agent: &Agent, scratch: &NeighborScratch) -> Vec2 {
    if agent.group_id != UNGROUPED {
        return Vec2::ZERO;
    }
    let radius = world.config.feedback.group_seek_radius.max(0.0);
    if radius <= 1e-6 {
        return Vec2::ZERO;
    }
    let radius_sq = radius * radius;
    let mut base_bias = Vec2::ZERO;
    if !world.group_bases.is_empty() {
        let mut nearest = Vec2::ZERO;
        let mut nearest_dist_sq = radius_sq;
        for base in world.group_bases.values() {
            let delta = *base - agent.position;
            let dist_sq = delta.length_squared();
            if dist_sq <= 1e-12 || dist_sq > radius_sq {
                continue;
            }
            if dist_sq < nearest_dist_sq {
                nearest = delta;
                nearest_dist_sq = dist_sq;
            }
        }
        if nearest_dist_sq < radius_sq {
            let dist = nearest_dist_sq.sqrt();
            let falloff = 1.0 - (dist / radius).min(1.0);
            if falloff > 1e-6 && dist > 1e-12 {
                base_bias = nearest * (falloff / dist);
            }
        }
    }
    let mut accum = Vec2::ZERO;
    let mut weight_sum = 0.0;
    for k in 0..scratch.len() {
        if world.agents[scratch.indices[k]].group_id == UNGROUPED {
            continue;
        }
        let dist_sq = scratch.dist_sq[k];
        if dist_sq <= 1e-12 || dist_sq > radius_sq {
            continue;
        }
        let dist = dist_sq.sqrt();
        let falloff = 1.0 - (dist / radius).min(1.0);
        if falloff <= 1e-5 {
            continue;
        }
        accum += scratch.offsets[k] * falloff;
        weight_sum += falloff;
    }
    if weight_sum <= 1e-6 {
        return base_bias.normalized_or_zero();
    }
    let mut blended = accum * (1.0 / weight_sum);
    if base_bias.length_squared() > 1e-12 {
        blended += base_bias;
    }
    blended.normalized_or_zero()
}

/// Normalized mean offset toward same-group neighbors within the
/// cohesion radius.
pub fn group_cohesion(world: &World, agent: &Agent, scratch: &NeighborScratch) -> Vec2 {
    if agent.group_id == UNGROUPED {
        return Vec2::ZERO;
    }
    let radius = world.config.feedback.group_cohesion_radius;
    let cohesion_radius_sq = radius * radius;
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for k in 0..scratch.len() {
        if world.agents[scratch.indices[k]].group_id != agent.group_id {
            continue;
        }
        if scratch.dist_sq[k] > cohesion_radius_sq {
            continue;
        }
        sum += scratch.offsets[k];
        count += 1;
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (sum * (1.0 / f64::from(count))).normalized_or_zero()
}

/// Pull toward the agent's group base: zero inside the dead zone,
/// quadratic ramp out to the soft radius, full strength beyond.
pub fn group_base_attraction(world: &World, agent: &Agent) -> Vec2 {
    if agent.group_id == UNGROUPED {
        return Vec2::ZERO;
    }
    let Some(base) = world.group_bases.get(&agent.group_id) else {
        return Vec2::ZERO;
    };
    let feedback = &world.config.feedback;
    let to_base = *base - agent.position;
    let dist_sq = to_base.length_squared();
    if dist_sq <= 1e-12 {
        return Vec2::ZERO;
    }
    let dead_zone = feedback.group_base_dead_zone.max(0.0);
    let dead_sq = dead_zone * dead_zone;
    if dist_sq <= dead_sq {
        return Vec2::ZERO;
    }
    let soft_radius = feedback.group_base_soft_radius.max(dead_zone);
    let soft_sq = soft_radius * soft_radius;
    let mut strength = 1.0;
    if soft_radius > dead_zone && dist_sq < soft_sq {
        let denom = (soft_sq - dead_sq).max(1e-12);
        let t = ((dist_sq - dead_sq) / denom).clamp(0.0, 1.0);
        strength = t * t;
    }
    to_base.normalized_or_zero() * strength
}

/// Averaged repulsion from every neighbor inside the personal-space
/// radius, strength rising linearly toward contact.
pub fn personal_space(feedback: &FeedbackConfig, scratch: &NeighborScratch) -> Vec2 {
    let radius = feedback.personal_space_radius;
    if radius <= 1e-6 || scratch.is_empty() {
        return Vec2::ZERO;
    }
    let radius_sq = radius * radius;
    let mut accum = Vec2::ZERO;
    let mut count = 0u32;
    for k in 0..scratch.len() {
        let dist_sq = scratch.dist_sq[k];
        if dist_sq <= 1e-9 || dist_sq > radius_sq {
            continue;
        }
        let dist = dist_sq.sqrt();
        if dist <= 1e-12 {
            continue;
        }
        let strength = 1.0 - (dist / radius).min(1.0);
        accum -= scratch.offsets[k] * (strength / dist);
        count += 1;
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (accum * (1.0 / f64::from(count))).normalized_or_zero()
}

/// Averaged repulsion from other-group neighbors inside the avoid radius.
pub fn intergroup_avoidance(world: &World, agent: &Agent, scratch: &NeighborScratch) -> Vec2 {
    let radius = world.config.feedback.other_group_avoid_radius;
    if radius <= 1e-6 {
        return Vec2::ZERO;
    }
    let radius_sq = radius * radius;
    let mut accum = Vec2::ZERO;
    let mut count = 0u32;
    for k in 0..scratch.len() {
        let other_group = world.agents[scratch.indices[k]].group_id;
        if agent.group_id == UNGROUPED || other_group == UNGROUPED {
            continue;
        }
        if other_group == agent.group_id {
            continue;
        }
        let dist_sq = scratch.dist_sq[k];
        if dist_sq <= 1e-9 || dist_sq > radius_sq {
            continue;
        }
        let dist = dist_sq.sqrt();
        if dist <= 1e-12 {
            continue;
        }
        let falloff = 1.0 - (dist / radius).min(1.0);
        if falloff <= 1e-5 {
            continue;
        }
        accum -= scratch.offsets[k] * (falloff / dist);
        count += 1;
    }
    if count == 0 {
        return Vec2::ZERO;
    }
    (accum * (1.0 / f64::from(count))).normalized_or_zero()
}

/// Returns the agent's wander direction, refreshing it from the main RNG
/// stream when the countdown expires.
pub fn wander_direction(world: &mut World, agent: &mut Agent) -> Vec2 {
    let refresh = world.config.species.wander_refresh_seconds.max(1e-4);
    if agent.wander_time <= 0.0 || agent.wander_dir.length_squared() < 1e-10 {
        agent.wander_dir = world.rng.next_unit_circle();
        agent.wander_time = refresh;
    } else {
        agent.wander_time -= world.config.time_step;
    }
    agent.wander_dir
}

/// Inward push near the world edge plus a proximity factor in [0, 1]
/// used to blend the desired vector toward the pure inward direction.
pub fn boundary_avoidance(config: &SimulationConfig, position: Vec2) -> (Vec2, f64) {
    let margin = config.boundary_margin;
    let size = config.world_size;
    if margin <= 1e-6 || size <= 0.0 {
        return (Vec2::ZERO, 0.0);
    }
    let x = position.x;
    let y = position.y;
    if (margin..=size - margin).contains(&x) && (margin..=size - margin).contains(&y) {
        return (Vec2::ZERO, 0.0);
    }

    let mut push = Vec2::ZERO;
    if x < margin {
        push.x += 1.0 - (x / margin);
    } else if x > size - margin {
        push.x -= 1.0 - ((size - x) / margin);
    }
    if y < margin {
        push.y += 1.0 - (y / margin);
    } else if y > size - margin {
        push.y -= 1.0 - ((size - y) / margin);
    }

    let proximity_x = (1.0 - x.min(size - x) / margin).max(0.0);
    let proximity_y = (1.0 - y.min(size - y) / margin).max(0.0);
    let proximity = proximity_x.max(proximity_y).min(1.0);

    let push_len_sq = push.length_squared();
    if push_len_sq < 1e-8 || proximity <= 0.0 {
        return (Vec2::ZERO, 0.0);
    }

    let strength = proximity * (0.4 + 0.6 * proximity);
    (push * (strength / push_len_sq.sqrt()), proximity)
}

/// Normalized mean offset toward all neighbors regardless of group.
pub fn cohesion(neighbor_offsets: &[Vec2]) -> Vec2 {
    if neighbor_offsets.is_empty() {
        return Vec2::ZERO;
    }
    let mut sum = Vec2::ZERO;
    for offset in neighbor_offsets {
        sum += *offset;
    }
    (sum * (1.0 / neighbor_offsets.len() as f64)).normalized_or_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    fn scratch_from(offsets: Vec<Vec2>) -> NeighborScratch {
        let dist_sq = offsets.iter().map(Vec2::length_squared).collect();
        NeighborScratch {
            indices: (0..offsets.len()).collect(),
            offsets,
            dist_sq,
        }
    }

    #[test]
    fn test_boundary_avoidance_pushes_inward_near_left_wall() {
        let config = SimulationConfig::default();
        let (push, proximity) = boundary_avoidance(&config, Vec2::new(1.0, 50.0));
        assert!(push.x > 0.0);
        // Axial wall: lateral drift stays small relative to the push.
        assert!(push.y.abs() < 0.2 * push.x.abs());
        assert!(proximity > 0.0);
    }

    #[test]
    fn test_boundary_avoidance_zero_in_interior() {
        let config = SimulationConfig::default();
        let (push, proximity) = boundary_avoidance(&config, Vec2::new(50.0, 50.0));
        assert_eq!(push, Vec2::ZERO);
        assert_eq!(proximity, 0.0);
    }

    #[test]
    fn test_boundary_avoidance_corner_pushes_diagonally() {
        let config = SimulationConfig::default();
        let (push, _) = boundary_avoidance(&config, Vec2::new(0.5, 0.5));
        assert!(push.x > 0.0);
        assert!(push.y > 0.0);
    }

    #[test]
    fn test_personal_space_points_away_from_crowd() {
        let feedback = FeedbackConfig::default();
        let scratch = scratch_from(vec![Vec2::new(1.0, 0.0), Vec2::new(0.8, 0.2)]);
        let bias = personal_space(&feedback, &scratch);
        assert!(bias.x < 0.0);
    }

    #[test]
    fn test_personal_space_ignores_distant_neighbors() {
        let feedback = FeedbackConfig::default();
        let scratch = scratch_from(vec![Vec2::new(50.0, 0.0)]);
        assert_eq!(personal_space(&feedback, &scratch), Vec2::ZERO);
    }

    #[test]
    fn test_cohesion_averages_toward_neighbors() {
        let offsets = vec![Vec2::new(2.0, 0.0), Vec2::new(4.0, 0.0)];
        let bias = cohesion(&offsets);
        assert!((bias.x - 1.0).abs() < 1e-12);
        assert_eq!(bias.y, 0.0);
    }

    #[test]
    fn test_resolve_overlap_separates_close_pair() {
        let mut position = Vec2::new(5.0, 5.0);
        let scratch = scratch_from(vec![Vec2::new(0.2, 0.0)]);
        resolve_overlap(0.9, &mut position, &scratch);
        // Pushed away from the neighbor sitting to the right.
        assert!(position.x < 5.0);
        assert_eq!(position.y, 5.0);
    }

    #[test]
    fn test_resolve_overlap_caps_correction() {
        let mut position = Vec2::new(5.0, 5.0);
        let scratch = scratch_from(vec![Vec2::new(1e-3, 0.0)]);
        resolve_overlap(1.0, &mut position, &scratch);
        assert!((position.x - 5.0).abs() <= 0.5 + 1e-9);
    }

    #[test]
    fn test_resolve_overlap_noop_without_min_separation() {
        let mut position = Vec2::new(5.0, 5.0);
        let scratch = scratch_from(vec![Vec2::new(0.1, 0.0)]);
        resolve_overlap(0.0, &mut position, &scratch);
        assert_eq!(position, Vec2::new(5.0, 5.0));
    }
}
