//! Tick metrics assembly and structured logging.

use terrarium_data::TickMetrics;

/// Aggregated per-tick population statistics gathered during the
/// per-agent pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopulationStats {
    pub population: usize,
    pub energy_sum: f64,
    pub age_sum: f64,
    pub groups: usize,
    pub ungrouped: usize,
}

#[must_use]
pub fn create_metrics(
    tick: u64,
    births: u32,
    deaths: u32,
    neighbor_checks: u64,
    tick_duration_ms: f64,
    stats: PopulationStats,
) -> TickMetrics {
    let (average_energy, average_age) = if stats.population == 0 {
        (0.0, 0.0)
    } else {
        (
            stats.energy_sum / stats.population as f64,
            stats.age_sum / stats.population as f64,
        )
    };
    TickMetrics {
        tick,
        population: stats.population,
        births,
        deaths,
        average_energy,
        average_age,
        groups: stats.groups,
        neighbor_checks,
        ungrouped: stats.ungrouped,
        tick_duration_ms,
    }
}

/// Emits a structured tick summary every 1000 ticks.
pub fn log_tick(metrics: &TickMetrics) {
    if metrics.tick % 1000 == 0 {
        tracing::info!(
            tick = metrics.tick,
            population = metrics.population,
            births = metrics.births,
            deaths = metrics.deaths,
            groups = metrics.groups,
            duration_ms = metrics.tick_duration_ms,
            "Simulation tick"
        );
    }
}

/// Initialize tracing subscriber for logging.
pub fn init_logging() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::INFO)
            .finish(),
    )
    .ok();
}
