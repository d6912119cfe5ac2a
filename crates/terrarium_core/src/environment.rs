//! Environment fields: food, per-group pheromone, and danger.
//!
//! All three fields are sparse maps keyed by integer cell coordinates.
//! Food cells are created lazily with default or resource-patch
//! parameters; pheromone and danger entries exist only where something
//! was deposited. Keyed maps are ordered so diffusion and snapshot
//! export iterate deterministically.

use crate::config::{EnvironmentConfig, ResourcePatchConfig};
use std::collections::{BTreeMap, BTreeSet};
use terrarium_data::{FoodCellSnapshot, FoodFieldSnapshot, PheromoneCellSnapshot, PheromoneFieldSnapshot, Vec2};

/// Integer cell coordinates, always within `[0, max_index)` on both axes.
pub type CellKey = (i32, i32);

/// Pheromone entries carry the depositing group's id.
pub type PheromoneKey = (i32, i32, i32);

const ORTHOGONAL_OFFSETS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

#[derive(Debug, Clone)]
pub struct FoodCell {
    pub value: f64,
    pub max: f64,
    pub regen_per_second: f64,
}

pub struct EnvironmentGrid {
    cell_size: f64,
    world_size: f64,
    max_index: i32,
    default_max_food: f64,
    default_food_regen: f64,
    default_initial_food: f64,
    food_diffusion_rate: f64,
    food_decay_rate: f64,
    pheromone_diffusion_rate: f64,
    pheromone_decay_rate: f64,
    danger_diffusion_rate: f64,
    danger_decay_rate: f64,
    patches: Vec<ResourcePatchConfig>,
    food_cells: BTreeMap<CellKey, FoodCell>,
    food_buffer: BTreeMap<CellKey, f64>,
    danger_field: BTreeMap<CellKey, f64>,
    danger_buffer: BTreeMap<CellKey, f64>,
    pheromone_field: BTreeMap<PheromoneKey, f64>,
    pheromone_buffer: BTreeMap<PheromoneKey, f64>,
    food_regen_multiplier: f64,
}

impl EnvironmentGrid {
    #[must_use]
    pub fn new(cell_size: f64, config: &EnvironmentConfig, world_size: f64) -> Self {
        let max_index = ((world_size / cell_size).ceil() as i32).max(1);
        let mut grid = Self {
            cell_size,
            world_size,
            max_index,
            default_max_food: config.food_per_cell,
            default_food_regen: config.food_regen_per_second,
            default_initial_food: config.food_per_cell.min(config.food_per_cell * 0.8),
            food_diffusion_rate: config.food_diffusion_rate,
            food_decay_rate: config.food_decay_rate,
            pheromone_diffusion_rate: config.pheromone_diffusion_rate,
            pheromone_decay_rate: config.pheromone_decay_rate,
            danger_diffusion_rate: config.danger_diffusion_rate,
            danger_decay_rate: config.danger_decay_rate,
            patches: config.resource_patches.clone(),
            food_cells: BTreeMap::new(),
            food_buffer: BTreeMap::new(),
            danger_field: BTreeMap::new(),
            danger_buffer: BTreeMap::new(),
            pheromone_field: BTreeMap::new(),
            pheromone_buffer: BTreeMap::new(),
            food_regen_multiplier: 1.0,
        };
        grid.initialize_patches();
        grid
    }

    pub fn reset(&mut self) {
        self.food_cells.clear();
        self.food_buffer.clear();
        self.danger_field.clear();
        self.danger_buffer.clear();
        self.pheromone_field.clear();
        self.pheromone_buffer.clear();
        self.food_regen_multiplier = 1.0;
        self.initialize_patches();
    }

    #[must_use]
    pub fn max_index(&self) -> i32 {
        self.max_index
    }

    #[must_use]
    pub fn food_regen_multiplier(&self) -> f64 {
        self.food_regen_multiplier
    }

    pub fn set_food_regen_multiplier(&mut self, multiplier: f64) {
        self.food_regen_multiplier = multiplier.max(0.0);
    }

    /// Maps a world position to its cell key, clamping to the grid extent.
    #[must_use]
    pub fn cell_key(&self, position: Vec2) -> CellKey {
        let clamped_x = position.x.clamp(0.0, self.world_size);
        let clamped_y = position.y.clamp(0.0, self.world_size);
        let ix = ((clamped_x / self.cell_size).floor() as i32).clamp(0, self.max_index - 1);
        let iy = ((clamped_y / self.cell_size).floor() as i32).clamp(0, self.max_index - 1);
        (ix, iy)
    }

    /// Clamped neighbor key; boundary cells sample themselves when the
    /// step would leave the grid (the gradient boundary policy).
    #[must_use]
    pub fn add_key(&self, key: CellKey, dx: i32, dy: i32) -> CellKey {
        (
            (key.0 + dx).clamp(0, self.max_index - 1),
            (key.1 + dy).clamp(0, self.max_index - 1),
        )
    }

    /// Returns the cell's food value, creating the cell if needed.
    pub fn sample_food(&mut self, key: CellKey) -> f64 {
        self.get_or_create_food_cell(key, None).value
    }

    /// Returns the food value without creating the cell.
    #[must_use]
    pub fn peek_food(&self, key: CellKey) -> f64 {
        self.food_cells.get(&key).map_or(0.0, |cell| cell.value)
    }

    pub fn consume_food(&mut self, key: CellKey, amount: f64) {
        let cell = self.get_or_create_food_cell(key, None);
        cell.value = (cell.value - amount).max(0.0);
    }

    pub fn add_food(&mut self, key: CellKey, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let cell = self.get_or_create_food_cell(key, Some(0.0));
        cell.value = (cell.value + amount).min(cell.max);
    }

    #[must_use]
    pub fn sample_danger(&self, key: CellKey) -> f64 {
        self.danger_field.get(&key).copied().unwrap_or(0.0)
    }

    pub fn add_danger(&mut self, key: CellKey, amount: f64) {
        *self.danger_field.entry(key).or_insert(0.0) += amount;
    }

    #[must_use]
    pub fn has_danger(&self) -> bool {
        !self.danger_field.is_empty()
    }

    #[must_use]
    pub fn sample_pheromone(&self, key: CellKey, group_id: i32) -> f64 {
        self.pheromone_field
            .get(&(key.0, key.1, group_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn add_pheromone(&mut self, key: CellKey, group_id: i32, amount: f64) {
        *self
            .pheromone_field
            .entry((key.0, key.1, group_id))
            .or_insert(0.0) += amount;
    }

    /// Total food across all cells; used by conservation checks.
    #[must_use]
    pub fn total_food(&self) -> f64 {
        self.food_cells.values().map(|cell| cell.value).sum()
    }

    /// Advances one environment sub-tick: regen, diffusion and decay of
    /// all three fields, then pheromone pruning for extinct groups.
    pub fn tick(&mut self, delta_time: f64, active_groups: &BTreeSet<i32>) {
        self.regen_food(delta_time);
        self.diffuse_food(delta_time);
        if self.danger_diffusion_rate > 0.0 || self.danger_decay_rate > 0.0 {
            let max_index = self.max_index;
            diffuse_map(
                &mut self.danger_field,
                &mut self.danger_buffer,
                self.danger_diffusion_rate,
                self.danger_decay_rate,
                delta_time,
                |key, dx, dy| clamped_neighbor(max_index, key, dx, dy),
            );
        }
        if self.pheromone_diffusion_rate > 0.0 || self.pheromone_decay_rate > 0.0 {
            let max_index = self.max_index;
            diffuse_map(
                &mut self.pheromone_field,
                &mut self.pheromone_buffer,
                self.pheromone_diffusion_rate,
                self.pheromone_decay_rate,
                delta_time,
                |key: PheromoneKey, dx, dy| {
                    let (nx, ny) = clamped_neighbor(max_index, (key.0, key.1), dx, dy);
                    (nx, ny, key.2)
                },
            );
        }
        self.prune_pheromones(active_groups);
    }

    pub fn prune_pheromones(&mut self, active_groups: &BTreeSet<i32>) {
        if self.pheromone_field.is_empty() {
            return;
        }
        if active_groups.is_empty() {
            self.pheromone_field.clear();
            return;
        }
        self.pheromone_field
            .retain(|key, _| active_groups.contains(&key.2));
    }

    #[must_use]
    pub fn export_food_cells(&self) -> FoodFieldSnapshot {
        let cells = self
            .food_cells
            .iter()
            .filter(|(_, cell)| cell.value > 0.0)
            .map(|(&(x, y), cell)| FoodCellSnapshot {
                x,
                y,
                value: cell.value,
            })
            .collect();
        FoodFieldSnapshot {
            cells,
            resolution: self.max_index,
            cell_size: self.cell_size,
        }
    }

    /// Exports at most one (strongest) group per cell.
    #[must_use]
    pub fn export_pheromone_field(&self) -> PheromoneFieldSnapshot {
        let mut per_cell: BTreeMap<CellKey, (f64, i32)> = BTreeMap::new();
        for (&(x, y, group_id), &value) in &self.pheromone_field {
            if value <= 0.0 {
                continue;
            }
            match per_cell.get(&(x, y)) {
                Some(&(best, _)) if best >= value => {}
                _ => {
                    per_cell.insert((x, y), (value, group_id));
                }
            }
        }
        let cells = per_cell
            .into_iter()
            .map(|((x, y), (value, group))| PheromoneCellSnapshot { x, y, value, group })
            .collect();
        PheromoneFieldSnapshot {
            cells,
            resolution: self.max_index,
            cell_size: self.cell_size,
        }
    }

    fn regen_food(&mut self, delta_time: f64) {
        let multiplier = self.food_regen_multiplier;
        for cell in self.food_cells.values_mut() {
            cell.value =
                (cell.value + cell.regen_per_second * multiplier * delta_time).min(cell.max);
        }
    }

    fn diffuse_food(&mut self, delta_time: f64) {
        if self.food_diffusion_rate <= 0.0 && self.food_decay_rate <= 0.0 {
            return;
        }
        let mut buffer = std::mem::take(&mut self.food_buffer);
        buffer.clear();
        for (&key, cell) in &self.food_cells {
            if cell.value <= 0.0 {
                continue;
            }
            let decayed = cell.value * (1.0 - self.food_decay_rate * delta_time).max(0.0);
            let spread = decayed * (self.food_diffusion_rate * delta_time).min(1.0);
            let remain = decayed - spread;
            let share = spread * 0.25;

            *buffer.entry(key).or_insert(0.0) += remain;
            for (dx, dy) in ORTHOGONAL_OFFSETS {
                *buffer.entry(self.add_key(key, dx, dy)).or_insert(0.0) += share;
            }
        }
        for (&key, &value) in &buffer {
            if value <= 1e-4 {
                continue;
            }
            let cell = self.get_or_create_food_cell(key, Some(0.0));
            cell.value = value.min(cell.max);
        }
        self.food_cells
            .retain(|key, cell| buffer.contains_key(key) || cell.value > 1e-4);
        self.food_buffer = buffer;
    }

    fn get_or_create_food_cell(&mut self, key: CellKey, initial_value: Option<f64>) -> &mut FoodCell {
        let cell_size = self.cell_size;
        let default_max = self.default_max_food;
        let default_regen = self.default_food_regen;
        let default_initial = initial_value.unwrap_or(self.default_initial_food);
        let patches = &self.patches;
        self.food_cells.entry(key).or_insert_with(|| {
            let mut max_food = default_max;
            let mut regen = default_regen;
            let mut start_value = default_initial;
            let center_x = (key.0 as f64 + 0.5) * cell_size;
            let center_y = (key.1 as f64 + 0.5) * cell_size;
            for patch in patches {
                let dx = center_x - patch.position.0;
                let dy = center_y - patch.position.1;
                if (dx * dx + dy * dy).sqrt() <= patch.radius {
                    max_food = patch.resource_per_cell;
                    regen = patch.regen_per_second;
                    start_value = patch.initial_resource;
                    break;
                }
            }
            FoodCell {
                value: start_value,
                max: max_food,
                regen_per_second: regen,
            }
        })
    }

    fn initialize_patches(&mut self) {
        if self.patches.is_empty() {
            return;
        }
        let patches = std::mem::take(&mut self.patches);
        for patch in &patches {
            let radius_cells = ((patch.radius / self.cell_size).ceil() as i32).max(1);
            let cx = (patch.position.0 / self.cell_size).floor() as i32;
            let cy = (patch.position.1 / self.cell_size).floor() as i32;
            for dx in -radius_cells..=radius_cells {
                for dy in -radius_cells..=radius_cells {
                    let key = (
                        (cx + dx).clamp(0, self.max_index - 1),
                        (cy + dy).clamp(0, self.max_index - 1),
                    );
                    let center_x = (key.0 as f64 + 0.5) * self.cell_size;
                    let center_y = (key.1 as f64 + 0.5) * self.cell_size;
                    let px = center_x - patch.position.0;
                    let py = center_y - patch.position.1;
                    if (px * px + py * py).sqrt() > patch.radius {
                        continue;
                    }
                    self.food_cells.insert(
                        key,
                        FoodCell {
                            value: patch.initial_resource,
                            max: patch.resource_per_cell,
                            regen_per_second: patch.regen_per_second,
                        },
                    );
                }
            }
        }
        self.patches = patches;
    }
}

fn clamped_neighbor(max_index: i32, key: CellKey, dx: i32, dy: i32) -> CellKey {
    (
        (key.0 + dx).clamp(0, max_index - 1),
        (key.1 + dy).clamp(0, max_index - 1),
    )
}

fn diffuse_map<K: Ord + Copy>(
    field: &mut BTreeMap<K, f64>,
    buffer: &mut BTreeMap<K, f64>,
    diffusion_rate: f64,
    decay_rate: f64,
    delta_time: f64,
    neighbor: impl Fn(K, i32, i32) -> K,
) {
    buffer.clear();
    for (&key, &value) in field.iter() {
        if value <= 0.0 {
            continue;
        }
        let decayed = value * (1.0 - decay_rate * delta_time).max(0.0);
        let spread = decayed * (diffusion_rate * delta_time).min(1.0);
        let remain = decayed - spread;
        let share = spread * 0.25;

        *buffer.entry(key).or_insert(0.0) += remain;
        for (dx, dy) in ORTHOGONAL_OFFSETS {
            *buffer.entry(neighbor(key, dx, dy)).or_insert(0.0) += share;
        }
    }
    field.clear();
    for (&key, &value) in buffer.iter() {
        if value > 1e-5 {
            field.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;

    fn grid_with(config: EnvironmentConfig) -> EnvironmentGrid {
        EnvironmentGrid::new(1.0, &config, 3.0)
    }

    #[test]
    fn test_cell_key_clamps_to_extent() {
        let grid = grid_with(EnvironmentConfig::default());
        assert_eq!(grid.cell_key(Vec2::new(-5.0, 1.5)), (0, 1));
        assert_eq!(grid.cell_key(Vec2::new(99.0, 99.0)), (2, 2));
    }

    #[test]
    fn test_add_key_boundary_cells_sample_themselves() {
        let grid = grid_with(EnvironmentConfig::default());
        assert_eq!(grid.add_key((0, 0), -1, 0), (0, 0));
        assert_eq!(grid.add_key((2, 2), 1, 1), (2, 2));
        assert_eq!(grid.add_key((1, 1), 1, 0), (2, 1));
    }

    #[test]
    fn test_lazy_cell_starts_at_default_fraction() {
        let mut grid = grid_with(EnvironmentConfig {
            food_per_cell: 10.0,
            ..EnvironmentConfig::default()
        });
        assert_eq!(grid.sample_food((1, 1)), 8.0);
        // peek does not create
        assert_eq!(grid.peek_food((2, 0)), 0.0);
    }

    #[test]
    fn test_patch_overrides_cell_parameters() {
        let config = EnvironmentConfig {
            resource_patches: vec![ResourcePatchConfig {
                position: (1.5, 1.5),
                radius: 1.0,
                resource_per_cell: 20.0,
                regen_per_second: 2.0,
                initial_resource: 15.0,
            }],
            ..EnvironmentConfig::default()
        };
        let mut grid = grid_with(config);
        assert_eq!(grid.sample_food((1, 1)), 15.0);
        // Far corner keeps defaults.
        assert_eq!(grid.sample_food((0, 2)), 8.0);
    }

    #[test]
    fn test_consume_floors_at_zero_and_add_caps_at_max() {
        let mut grid = grid_with(EnvironmentConfig::default());
        grid.sample_food((0, 0));
        grid.consume_food((0, 0), 100.0);
        assert_eq!(grid.peek_food((0, 0)), 0.0);
        grid.add_food((0, 0), 100.0);
        assert_eq!(grid.peek_food((0, 0)), 10.0);
    }

    #[test]
    fn test_mass_conserved_without_rates() {
        let config = EnvironmentConfig {
            food_regen_per_second: 0.0,
            food_diffusion_rate: 0.0,
            food_decay_rate: 0.0,
            ..EnvironmentConfig::default()
        };
        let mut grid = grid_with(config);
        grid.sample_food((0, 0));
        grid.sample_food((1, 2));
        let before = grid.total_food();
        let active = BTreeSet::new();
        for _ in 0..50 {
            grid.tick(0.1, &active);
        }
        assert!((grid.total_food() - before).abs() < 1e-4);
    }

    #[test]
    fn test_diffusion_conserves_mass_with_clamped_edges() {
        let config = EnvironmentConfig {
            food_per_cell: 100.0,
            food_regen_per_second: 0.0,
            food_diffusion_rate: 0.5,
            food_decay_rate: 0.0,
            ..EnvironmentConfig::default()
        };
        let mut grid = grid_with(config);
        grid.add_food((0, 0), 40.0);
        let before = grid.total_food();
        let active = BTreeSet::new();
        grid.tick(0.1, &active);
        assert!((grid.total_food() - before).abs() < 1e-4);
    }

    #[test]
    fn test_danger_decays_away() {
        let mut grid = grid_with(EnvironmentConfig::default());
        grid.add_danger((1, 1), 1.0);
        assert!(grid.has_danger());
        let active = BTreeSet::new();
        for _ in 0..200 {
            grid.tick(0.5, &active);
        }
        assert!(!grid.has_danger());
    }

    #[test]
    fn test_prune_pheromones_drops_extinct_groups() {
        let mut grid = grid_with(EnvironmentConfig::default());
        grid.add_pheromone((0, 0), 3, 1.0);
        grid.add_pheromone((0, 0), 7, 1.0);
        let mut active = BTreeSet::new();
        active.insert(3);
        grid.prune_pheromones(&active);
        assert!(grid.sample_pheromone((0, 0), 3) > 0.0);
        assert_eq!(grid.sample_pheromone((0, 0), 7), 0.0);
        grid.prune_pheromones(&BTreeSet::new());
        assert_eq!(grid.sample_pheromone((0, 0), 3), 0.0);
    }

    #[test]
    fn test_pheromone_export_keeps_strongest_group_per_cell() {
        let mut grid = grid_with(EnvironmentConfig::default());
        grid.add_pheromone((1, 1), 2, 0.5);
        grid.add_pheromone((1, 1), 5, 1.5);
        grid.add_pheromone((0, 0), 2, 0.25);
        let export = grid.export_pheromone_field();
        assert_eq!(export.cells.len(), 2);
        let strongest = export
            .cells
            .iter()
            .find(|cell| cell.x == 1 && cell.y == 1)
            .expect("cell (1,1) exported");
        assert_eq!(strongest.group, 5);
        assert_eq!(strongest.value, 1.5);
    }

    #[test]
    fn test_regen_respects_climate_multiplier() {
        let config = EnvironmentConfig {
            food_per_cell: 10.0,
            food_regen_per_second: 1.0,
            ..EnvironmentConfig::default()
        };
        let mut grid = grid_with(config);
        grid.sample_food((0, 0));
        grid.consume_food((0, 0), 100.0);
        grid.set_food_regen_multiplier(0.5);
        let active = BTreeSet::new();
        grid.tick(1.0, &active);
        assert!((grid.peek_food((0, 0)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_restores_patches() {
        let config = EnvironmentConfig {
            resource_patches: vec![ResourcePatchConfig {
                position: (0.5, 0.5),
                radius: 0.6,
                resource_per_cell: 30.0,
                regen_per_second: 1.0,
                initial_resource: 25.0,
            }],
            ..EnvironmentConfig::default()
        };
        let mut grid = grid_with(config);
        grid.consume_food((0, 0), 100.0);
        grid.reset();
        assert_eq!(grid.peek_food((0, 0)), 25.0);
    }
}
