//! Uniform-cell spatial index for neighbor queries.
//!
//! Agents are bucketed by `(floor(x / cell_size), floor(y / cell_size))`
//! into a flat `cols x rows` vector of index buckets. The grid stores
//! indices into the world's agent vector and is rebuilt every tick;
//! `clear` keeps bucket capacity so steady-state ticks allocate nothing.

use terrarium_data::{Agent, Vec2};

/// Caller-owned parallel output buffers for a neighbor query, reused
/// across agents and ticks.
#[derive(Debug, Default)]
pub struct NeighborScratch {
    pub indices: Vec<usize>,
    pub offsets: Vec<Vec2>,
    pub dist_sq: Vec<f64>,
}

impl NeighborScratch {
    pub fn clear(&mut self) {
        self.indices.clear();
        self.offsets.clear();
        self.dist_sq.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub struct SpatialGrid {
    cell_size: f64,
    cols: i32,
    rows: i32,
    cells: Vec<Vec<usize>>,
    active_cells: Vec<usize>,
}

impl SpatialGrid {
    #[must_use]
    pub fn new(cell_size: f64, world_size: f64) -> Self {
        let cols = ((world_size / cell_size).ceil() as i32).max(1);
        let rows = cols;
        Self {
            cell_size,
            cols,
            rows,
            cells: vec![Vec::new(); (cols * rows) as usize],
            active_cells: Vec::new(),
        }
    }

    /// Empties all occupied buckets while preserving their capacity.
    pub fn clear(&mut self) {
        for &cell in &self.active_cells {
            self.cells[cell].clear();
        }
        self.active_cells.clear();
    }

    /// Precomputes the square cell-offset pattern covering `radius`,
    /// cached by the world and reused until the radius changes.
    #[must_use]
    pub fn build_neighbor_cell_offsets(&self, radius: f64) -> Vec<(i32, i32)> {
        let cell_range = (radius / self.cell_size).ceil() as i32;
        let mut offsets = Vec::with_capacity(((2 * cell_range + 1).pow(2)) as usize);
        for dx in -cell_range..=cell_range {
            for dy in -cell_range..=cell_range {
                offsets.push((dx, dy));
            }
        }
        offsets
    }

    /// Places an agent index into the bucket containing `position`.
    ///
    /// An out-of-bounds position indicates a caller bug; the key is
    /// clamped to the last valid index rather than panicking.
    pub fn insert(&mut self, index: usize, position: Vec2) {
        let cell = self.clamped_cell_index(position);
        if self.cells[cell].is_empty() {
            self.active_cells.push(cell);
        }
        self.cells[cell].push(index);
    }

    /// Fills the scratch buffers with every agent within `sqrt(radius_sq)`
    /// of `center`, excluding `exclude` itself. Output arrays are parallel:
    /// indices, offsets from `center`, and squared distances.
    pub fn collect_neighbors(
        &self,
        agents: &[Agent],
        center: Vec2,
        cell_offsets: &[(i32, i32)],
        radius_sq: f64,
        exclude: usize,
        out: &mut NeighborScratch,
    ) {
        out.clear();
        let base_x = (center.x / self.cell_size).floor() as i32;
        let base_y = (center.y / self.cell_size).floor() as i32;

        for &(dx, dy) in cell_offsets {
            let cx = base_x + dx;
            let cy = base_y + dy;
            if cx < 0 || cx >= self.cols || cy < 0 || cy >= self.rows {
                continue;
            }
            let bucket = &self.cells[(cy * self.cols + cx) as usize];
            for &index in bucket {
                if index == exclude {
                    continue;
                }
                let offset = agents[index].position - center;
                let dist_sq = offset.length_squared();
                if dist_sq <= radius_sq {
                    out.indices.push(index);
                    out.offsets.push(offset);
                    out.dist_sq.push(dist_sq);
                }
            }
        }
    }

    fn clamped_cell_index(&self, position: Vec2) -> usize {
        let cx = ((position.x / self.cell_size).floor() as i32).clamp(0, self.cols - 1);
        let cy = ((position.y / self.cell_size).floor() as i32).clamp(0, self.rows - 1);
        (cy * self.cols + cx) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_at(x: f64, y: f64) -> Agent {
        Agent {
            position: Vec2::new(x, y),
            ..Agent::default()
        }
    }

    #[test]
    fn test_query_finds_same_cell_neighbors() {
        let agents = vec![agent_at(5.0, 5.0), agent_at(7.0, 8.0)];
        let mut grid = SpatialGrid::new(10.0, 100.0);
        for (i, a) in agents.iter().enumerate() {
            grid.insert(i, a.position);
        }
        let offsets = grid.build_neighbor_cell_offsets(5.0);
        let mut out = NeighborScratch::default();
        grid.collect_neighbors(&agents, Vec2::new(6.0, 6.0), &offsets, 25.0, usize::MAX, &mut out);
        assert_eq!(out.indices, vec![0, 1]);
    }

    #[test]
    fn test_query_excludes_distant_and_self() {
        let agents = vec![
            agent_at(10.0, 10.0),
            agent_at(12.0, 10.0),
            agent_at(90.0, 90.0),
        ];
        let mut grid = SpatialGrid::new(5.0, 100.0);
        for (i, a) in agents.iter().enumerate() {
            grid.insert(i, a.position);
        }
        let offsets = grid.build_neighbor_cell_offsets(5.0);
        let mut out = NeighborScratch::default();
        grid.collect_neighbors(&agents, agents[0].position, &offsets, 25.0, 0, &mut out);
        assert_eq!(out.indices, vec![1]);
        assert!((out.dist_sq[0] - 4.0).abs() < 1e-12);
        assert!((out.offsets[0].x - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_empties_buckets() {
        let agents = vec![agent_at(5.0, 5.0), agent_at(15.0, 15.0)];
        let mut grid = SpatialGrid::new(10.0, 100.0);
        for (i, a) in agents.iter().enumerate() {
            grid.insert(i, a.position);
        }
        grid.clear();
        let offsets = grid.build_neighbor_cell_offsets(50.0);
        let mut out = NeighborScratch::default();
        grid.collect_neighbors(&agents, Vec2::new(10.0, 10.0), &offsets, 2500.0, usize::MAX, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_out_of_bounds_insert_clamps() {
        let agents = vec![agent_at(150.0, -3.0)];
        let mut grid = SpatialGrid::new(10.0, 100.0);
        grid.insert(0, agents[0].position);
        // The entry lands in the clamped corner bucket and is still found
        // when querying near it with a generous radius.
        let offsets = grid.build_neighbor_cell_offsets(80.0);
        let mut out = NeighborScratch::default();
        grid.collect_neighbors(&agents, Vec2::new(99.0, 1.0), &offsets, 6400.0, usize::MAX, &mut out);
        assert_eq!(out.indices, vec![0]);
    }

    #[test]
    fn test_offset_pattern_spans_radius() {
        let grid = SpatialGrid::new(2.5, 100.0);
        let offsets = grid.build_neighbor_cell_offsets(8.0);
        // ceil(8 / 2.5) = 4 cells each direction -> 9x9 pattern.
        assert_eq!(offsets.len(), 81);
        assert!(offsets.contains(&(-4, 4)));
        assert!(offsets.contains(&(0, 0)));
    }
}
