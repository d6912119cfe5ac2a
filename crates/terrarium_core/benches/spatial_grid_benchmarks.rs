use criterion::{black_box, criterion_group, criterion_main, Criterion};
use terrarium_core::spatial_grid::{NeighborScratch, SpatialGrid};
use terrarium_data::{Agent, Vec2};

fn make_agents() -> Vec<Agent> {
    (0..1000)
        .map(|i| Agent {
            id: i as u64,
            position: Vec2::new((i % 100) as f64, (i / 100) as f64 * 10.0),
            ..Agent::default()
        })
        .collect()
}

fn bench_spatial_grid_rebuild(c: &mut Criterion) {
    let agents = make_agents();
    let mut grid = SpatialGrid::new(2.5, 100.0);

    c.bench_function("spatial_grid_rebuild_1000", |b| {
        b.iter(|| {
            grid.clear();
            for (index, agent) in agents.iter().enumerate() {
                grid.insert(index, agent.position);
            }
            black_box(&grid);
        })
    });
}

fn bench_spatial_grid_query_vision(c: &mut Criterion) {
    let agents = make_agents();
    let mut grid = SpatialGrid::new(2.5, 100.0);
    for (index, agent) in agents.iter().enumerate() {
        grid.insert(index, agent.position);
    }
    let offsets = grid.build_neighbor_cell_offsets(8.0);

    c.bench_function("spatial_grid_query_radius_8", |b| {
        let mut scratch = NeighborScratch::default();
        b.iter(|| {
            grid.collect_neighbors(
                &agents,
                Vec2::new(50.0, 50.0),
                &offsets,
                64.0,
                usize::MAX,
                &mut scratch,
            );
            black_box(scratch.len())
        })
    });
}

fn bench_spatial_grid_query_small(c: &mut Criterion) {
    let agents = make_agents();
    let mut grid = SpatialGrid::new(2.5, 100.0);
    for (index, agent) in agents.iter().enumerate() {
        grid.insert(index, agent.position);
    }
    let offsets = grid.build_neighbor_cell_offsets(2.0);

    c.bench_function("spatial_grid_query_radius_2", |b| {
        let mut scratch = NeighborScratch::default();
        b.iter(|| {
            grid.collect_neighbors(
                &agents,
                Vec2::new(50.0, 50.0),
                &offsets,
                4.0,
                usize::MAX,
                &mut scratch,
            );
            black_box(scratch.len())
        })
    });
}

criterion_group!(
    benches,
    bench_spatial_grid_rebuild,
    bench_spatial_grid_query_vision,
    bench_spatial_grid_query_small
);
criterion_main!(benches);
