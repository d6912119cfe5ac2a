//! Group membership state machine.
//!
//! Agents carry a small integer group handle (`UNGROUPED` = -1). The
//! reverse mapping (group -> members) is never materialized; per-tick
//! counts are tallied from neighbor queries. Each group has a single
//! founding-location base, registered at creation and pruned once the
//! group has no live members.

use crate::spatial_grid::NeighborScratch;
use crate::world::World;
use terrarium_data::{Agent, AgentTraits, Vec2, UNGROUPED};

pub fn decay_group_cooldown(dt: f64, agent: &mut Agent) {
    if agent.group_cooldown > 0.0 {
        agent.group_cooldown = (agent.group_cooldown - dt).max(0.0);
    }
}

/// Moves an agent into a group, resetting its lonely counter and arming
/// the merge cooldown for non-trivial joins.
pub fn assign_group(agent: &mut Agent, group_id: i32, merge_cooldown: f64) {
    agent.group_id = group_id;
    agent.group_lonely_seconds = 0.0;
    if group_id == UNGROUPED {
        agent.group_cooldown = 0.0;
        return;
    }
    if merge_cooldown > 0.0 {
        agent.group_cooldown = agent.group_cooldown.max(merge_cooldown);
    }
}

pub fn set_group_by_index(world: &mut World, index: usize, group_id: i32) {
    let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
    assign_group(&mut world.agents[index], group_id, merge_cooldown);
}

/// Records the founding location of a new group. Existing bases are
/// never moved.
pub fn register_group_base(world: &mut World, group_id: i32, position: Vec2) {
    if group_id == UNGROUPED {
        return;
    }
    world.group_bases.entry(group_id).or_insert(position);
}

/// Drops bases of groups with no live members or enqueued births.
pub fn prune_group_bases(world: &mut World) {
    if world.group_bases.is_empty() {
        return;
    }
    if world.active_groups.is_empty() {
        world.group_bases.clear();
        return;
    }
    let active = &world.active_groups;
    world.group_bases.retain(|group_id, _| active.contains(group_id));
}

/// Pulls the closest former allies within the cohesion radius into a
/// freshly split-off group.
pub fn recruit_split_neighbors(
    world: &mut World,
    previous_group: i32,
    new_group: i32,
    scratch: &NeighborScratch,
) {
    let max_recruits = world.config.feedback.group_split_recruitment_count as usize;
    if max_recruits == 0 || new_group == UNGROUPED {
        return;
    }
    let radius = world.config.feedback.group_cohesion_radius;
    let radius_sq = radius * radius;
    let mut candidates: Vec<(f64, usize)> = Vec::new();
    for k in 0..scratch.len() {
        let index = scratch.indices[k];
        if world.agents[index].group_id != previous_group {
            continue;
        }
        let dist_sq = scratch.dist_sq[k];
        if dist_sq > radius_sq {
            continue;
        }
        candidates.push((dist_sq, index));
    }
    if candidates.is_empty() {
        return;
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    for &(_, index) in candidates.iter().take(max_recruits) {
        set_group_by_index(world, index, new_group);
    }
}

/// Runs one tick of the membership state machine for `agent` and returns
/// the number of same-group neighbors seen.
pub fn update_group_membership(
    world: &mut World,
    agent: &mut Agent,
    scratch: &NeighborScratch,
    can_form_groups: bool,
    detach_radius_sq: f64,
    close_threshold: u32,
    traits: &AgentTraits,
) -> u32 {
    let original_group = agent.group_id;
    let loyalty = traits.loyalty.max(0.1);
    let kin_bias = traits.kin_bias;
    let use_kin_bias = (kin_bias - 1.0).abs() > 1e-6;
    let prev_lonely = agent.group_lonely_seconds;
    let dt = world.config.time_step;
    decay_group_cooldown(dt, agent);
    world.group_counts_scratch.clear();
    world.ungrouped_neighbors.clear();
    if use_kin_bias {
        world.group_lineage_counts.clear();
    }
    let mut same_group_neighbors = 0u32;
    let mut same_group_close_neighbors = 0u32;
    for k in 0..scratch.len() {
        let index = scratch.indices[k];
        let (other_group, other_lineage) = {
            let other = &world.agents[index];
            (other.group_id, other.lineage_id)
        };
        if other_group == UNGROUPED {
            world.ungrouped_neighbors.push(index);
        }
        if agent.group_id != UNGROUPED && other_group == agent.group_id {
            same_group_neighbors += 1;
            if scratch.dist_sq[k] <= detach_radius_sq {
                same_group_close_neighbors += 1;
            }
        }
        if other_group >= 0 {
            *world.group_counts_scratch.entry(other_group).or_insert(0) += 1;
            if use_kin_bias && other_lineage == agent.lineage_id {
                *world.group_lineage_counts.entry(other_group).or_insert(0) += 1;
            }
        }
    }

    // Kin-biased score; ties break toward the larger plain count, then
    // the smaller group id via the ordered scan.
    let mut majority_group = UNGROUPED;
    let mut majority_count = 0u32;
    let mut switch_group = UNGROUPED;
    let mut switch_count = 0u32;
    let mut majority_score = f64::NEG_INFINITY;
    let mut switch_score = f64::NEG_INFINITY;
    for (&group_id, &count) in &world.group_counts_scratch {
        let score = if use_kin_bias {
            let kin_count = world
                .group_lineage_counts
                .get(&group_id)
                .copied()
                .unwrap_or(0);
            f64::from(count) + (kin_bias - 1.0) * f64::from(kin_count)
        } else {
            f64::from(count)
        };
        if score > majority_score
            || ((score - majority_score).abs() < 1e-9 && count > majority_count)
        {
            majority_group = group_id;
            majority_count = count;
            majority_score = score;
        }
        if group_id == agent.group_id {
            continue;
        }
        if score > switch_score || ((score - switch_score).abs() < 1e-9 && count > switch_count) {
            switch_group = group_id;
            switch_count = count;
            switch_score = score;
        }
    }

    if agent.group_id == UNGROUPED {
        agent.group_lonely_seconds = 0.0;
    } else {
        if same_group_close_neighbors >= close_threshold {
            agent.group_lonely_seconds = 0.0;
        } else {
            agent.group_lonely_seconds = prev_lonely + dt;
        }
        let effective_detach_seconds =
            world.config.feedback.group_detach_after_seconds * loyalty;
        if agent.group_lonely_seconds >= effective_detach_seconds {
            let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
            let switch_threshold = world.config.feedback.group_adoption_neighbor_threshold.max(1);
            let switch_chance = (world.config.feedback.group_switch_chance / loyalty).min(1.0);
            if switch_group != UNGROUPED
                && switch_count >= switch_threshold
                && world.rng.next_float() < switch_chance
            {
                assign_group(agent, switch_group, merge_cooldown);
            } else if can_form_groups
                && world.rng.next_float()
                    < (world.config.feedback.group_detach_new_group_chance
                        * traits.founder.max(0.0))
                    .min(1.0)
            {
                let new_group = world.allocate_group();
                register_group_base(world, new_group, agent.position);
                assign_group(agent, new_group, merge_cooldown);
            } else {
                assign_group(agent, UNGROUPED, merge_cooldown);
            }
            agent.group_lonely_seconds = 0.0;
        }
    }

    if can_form_groups {
        try_form_group(world, agent);
        if agent.group_id == original_group {
            try_adopt_group(
                world,
                agent,
                majority_group,
                majority_count,
                same_group_neighbors,
                traits,
            );
        }
    }
    if agent.group_id == UNGROUPED && !world.group_bases.is_empty() {
        let seek_radius = world.config.feedback.group_seek_radius * 1.5;
        let seek_radius_sq = seek_radius * seek_radius;
        let mut nearest_group = UNGROUPED;
        let mut nearest_dist_sq = seek_radius_sq;
        for (&group_id, base) in &world.group_bases {
            let dist_sq = (*base - agent.position).length_squared();
            if dist_sq <= 1e-12 || dist_sq > seek_radius_sq {
                continue;
            }
            if dist_sq < nearest_dist_sq {
                nearest_group = group_id;
                nearest_dist_sq = dist_sq;
            }
        }
        if nearest_group != UNGROUPED
            && world.rng.next_float() < world.config.feedback.group_adoption_chance
        {
            let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
            assign_group(agent, nearest_group, merge_cooldown);
        }
    }
    if agent.group_id == original_group {
        try_split_group(
            world,
            agent,
            same_group_neighbors,
            scratch,
            can_form_groups,
            traits,
        );
    }
    same_group_neighbors
}

fn try_form_group(world: &mut World, agent: &mut Agent) {
    if agent.group_id != UNGROUPED {
        return;
    }
    let threshold = world.config.feedback.group_formation_neighbor_threshold as usize;
    if world.ungrouped_neighbors.len() < threshold {
        return;
    }
    if world.rng.next_float() >= world.config.feedback.group_formation_chance {
        return;
    }

    let merge_cooldown = world.config.feedback.group_merge_cooldown_seconds;
    let new_group = world.allocate_group();
    register_group_base(world, new_group, agent.position);
    assign_group(agent, new_group, merge_cooldown);
    let recruits = world.ungrouped_neighbors.len().min(threshold + 2);
    for k in 0..recruits {
        let index = world.ungrouped_neighbors[k];
        set_group_by_index(world, index, new_group);
    }
}

fn try_adopt_group(
    world: &mut World,
    agent: &mut Agent,
    majority_group: i32,
    majority_count: u32,
    same_group_neighbors: u32,
    traits: &AgentTraits,
) {
    if majority_group == UNGROUPED || agent.group_id == majority_group {
        return;
    }
    if agent.group_cooldown > 0.0 {
        return;
    }
    let feedback = &world.config.feedback;
    if agent.group_id != UNGROUPED
        && same_group_neighbors >= feedback.group_adoption_guard_min_allies
    {
        return;
    }
    let target_size = world
        .group_sizes
        .get(&majority_group)
        .copied()
        .unwrap_or(majority_count);
    let size_for_threshold = if target_size > 0 {
        target_size
    } else {
        majority_count
    };
    let effective_threshold = feedback
        .group_adoption_neighbor_threshold
        .min(size_for_threshold.max(1))
        .max(1);
    if majority_count < effective_threshold {
        return;
    }
    let size_for_bonus = f64::from(target_size.max(1));
    let sociality = traits.sociality.max(0.0);
    let loyalty = traits.loyalty.max(0.1);
    let mut adoption_chance = feedback.group_adoption_chance
        * (1.0 + feedback.group_adoption_small_group_bonus / size_for_bonus)
        * sociality;
    if agent.group_id != UNGROUPED {
        adoption_chance /= loyalty;
    }
    let adoption_chance = adoption_chance.clamp(0.0, 1.0);
    let merge_cooldown = feedback.group_merge_cooldown_seconds;
    if world.rng.next_float() < adoption_chance {
        assign_group(agent, majority_group, merge_cooldown);
    }
}

fn try_split_group(
    world: &mut World,
    agent: &mut Agent,
    same_group_neighbors: u32,
    scratch: &NeighborScratch,
    can_form_groups: bool,
    traits: &AgentTraits,
) {
    if agent.group_id == UNGROUPED {
        return;
    }
    let feedback = world.config.feedback.clone();
    if same_group_neighbors < feedback.group_split_neighbor_threshold {
        return;
    }
    let effective_stress = agent.stress
        + f64::from(same_group_neighbors) * feedback.group_split_size_stress_weight;
    if effective_stress < feedback.group_split_stress_threshold {
        return;
    }
    let bonus_neighbors =
        same_group_neighbors.saturating_sub(feedback.group_split_neighbor_threshold);
    let size_bonus = f64::from(bonus_neighbors) * feedback.group_split_size_bonus_per_neighbor;
    let split_chance = (feedback.group_split_chance + size_bonus)
        .min(feedback.group_split_chance_max)
        .min(1.0);
    if split_chance <= 0.0 {
        return;
    }
    if world.rng.next_float() < split_chance {
        let previous_group = agent.group_id;
        let mut target_group = UNGROUPED;
        if can_form_groups
            && world.rng.next_float()
                < (feedback.group_split_new_group_chance * traits.founder.max(0.0)).min(1.0)
        {
            target_group = world.allocate_group();
            register_group_base(world, target_group, agent.position);
        }
        assign_group(agent, target_group, feedback.group_merge_cooldown_seconds);
        if target_group != UNGROUPED && can_form_groups {
            recruit_split_neighbors(world, previous_group, target_group, scratch);
        }
    }
}
