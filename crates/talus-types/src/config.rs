//! Simulation configuration.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunable parameters of the simulation.
///
/// One configuration is shared by the coordinator and every island worker;
/// it is fixed at construction time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimConfig {
    /// Fixed simulation timestep (s). Workers step at integer multiples.
    pub fixed_dt: f64,
    /// World gravity applied to gravity-sensitive dynamic bodies (m/s²).
    pub gravity: Vector3<f64>,
    /// Solver iteration count per step.
    pub solver_iterations: u32,
    /// Maximum steps a worker may lag before dropping time.
    pub max_lagging_steps: u32,

    /// Candidate contact points within this distance of an existing point's
    /// pivot update that point instead of inserting a new one (m).
    pub contact_caching_distance: f64,
    /// Points farther apart than this along the normal, or drifted
    /// laterally beyond it, are removed (m).
    pub contact_breaking_distance: f64,
    /// Default AABB separation beyond which a manifold is destroyed (m).
    pub manifold_separation_threshold: f64,
    /// Broadphase tree leaf fattening margin (m).
    pub aabb_fat_margin: f64,
    /// Inset applied to a body's AABB when querying for new pairs (m).
    /// Keeps exactly-touching AABBs from pairing.
    pub aabb_query_offset: f64,
    /// Manifold count above which narrowphase pair evaluation forks
    /// subtasks.
    pub narrowphase_parallel_threshold: usize,

    /// Squared-speed sleep threshold base, linear (m/s).
    pub linear_sleep_threshold: f64,
    /// Angular sleep threshold (rad/s).
    pub angular_sleep_threshold: f64,
    /// Continuous below-threshold time before an island sleeps (s).
    pub time_to_sleep: f64,
    /// Debounce before a topology change triggers a connectivity check (s).
    pub split_calculation_delay: f64,

    /// OS threads in the job dispatcher pool. `None` picks the available
    /// parallelism.
    pub worker_threads: Option<usize>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            gravity: Vector3::new(0.0, -9.8, 0.0),
            solver_iterations: 10,
            max_lagging_steps: 10,

            contact_caching_distance: 0.04,
            contact_breaking_distance: 0.04,
            manifold_separation_threshold: 0.08,
            aabb_fat_margin: 0.1,
            aabb_query_offset: 1e-3,
            narrowphase_parallel_threshold: 8,

            linear_sleep_threshold: 0.005,
            angular_sleep_threshold: std::f64::consts::PI / 48.0,
            time_to_sleep: 0.5,
            split_calculation_delay: 1.1,

            worker_threads: None,
        }
    }
}

impl SimConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.fixed_dt.is_finite() && self.fixed_dt > 0.0) {
            return Err(crate::TalusError::InvalidConfig {
                reason: "fixed_dt must be positive and finite".into(),
            });
        }
        if self.solver_iterations == 0 {
            return Err(crate::TalusError::InvalidConfig {
                reason: "solver_iterations must be at least 1".into(),
            });
        }
        if self.manifold_separation_threshold < self.contact_breaking_distance {
            return Err(crate::TalusError::InvalidConfig {
                reason: "manifold separation threshold must cover the contact breaking distance"
                    .into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_timestep() {
        let cfg = SimConfig {
            fixed_dt: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let cfg = SimConfig {
            manifold_separation_threshold: 0.01,
            contact_breaking_distance: 0.04,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
