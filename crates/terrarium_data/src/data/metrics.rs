use serde::{Deserialize, Serialize};

/// Aggregate statistics produced by one `step` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    pub tick: u64,
    pub population: usize,
    pub births: u32,
    pub deaths: u32,
    pub average_energy: f64,
    pub average_age: f64,
    /// Number of distinct live group ids.
    pub groups: usize,
    /// Sum of neighbor query results this tick.
    pub neighbor_checks: u64,
    pub ungrouped: usize,
    /// Wall-clock duration; excluded from determinism comparisons.
    pub tick_duration_ms: f64,
}

impl TickMetrics {
    /// The deterministic portion of the metrics, for run-to-run comparison.
    #[must_use]
    pub fn deterministic_fields(&self) -> (u64, usize, u32, u32, u64, f64, f64, usize, usize) {
        (
            self.tick,
            self.population,
            self.births,
            self.deaths,
            self.neighbor_checks,
            self.average_energy,
            self.average_age,
            self.groups,
            self.ungrouped,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_fields_ignore_duration() {
        let mut a = TickMetrics {
            tick: 3,
            population: 10,
            births: 1,
            deaths: 0,
            average_energy: 5.0,
            average_age: 2.0,
            groups: 2,
            neighbor_checks: 40,
            ungrouped: 4,
            tick_duration_ms: 0.7,
        };
        let mut b = a.clone();
        a.tick_duration_ms = 9.9;
        b.tick_duration_ms = 0.1;
        assert_eq!(a.deterministic_fields(), b.deterministic_fields());
    }
}
