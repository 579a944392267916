//! Simulation tuning parameters.

use glam::Vec3;

/// Configuration for the physics simulation.
#[derive(Debug, Clone)]
pub struct PhysicsSettings {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed timestep used by [`World::step`](crate::World::step). Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of sub-steps per frame. Default: 4.
    pub max_substeps: u32,
    /// Sequential-impulse iterations per step. Default: 8.
    pub velocity_iterations: u32,
    /// Positional correction iterations per step. Default: 4.
    pub position_iterations: u32,
    /// Penetration allowed before positional correction kicks in. Default: 0.001.
    pub linear_slop: f32,
    /// Fraction of the penetration removed per position iteration. Default: 0.2.
    pub baumgarte: f32,
    /// Largest positional correction applied to one point in one iteration. Default: 0.2.
    pub max_linear_correction: f32,
    /// Approach speed below which restitution is ignored. Default: 1.0.
    pub velocity_threshold: f32,
    /// Linear speed below which a body may fall asleep. Default: 0.1.
    pub linear_sleep_threshold: f32,
    /// Angular speed below which a body may fall asleep. Default: 0.05.
    pub angular_sleep_threshold: f32,
    /// Extra seconds a body must stay below both thresholds before sleeping.
    /// At 0 an island sleeps after the first step in which every body is slow.
    /// Default: 0.0.
    pub time_to_sleep: f32,
    /// Margin added on every side of a fixture's broad-phase AABB. Default: 0.1.
    pub aabb_margin: f32,
    /// Scale of the predictive AABB expansion along the displacement. Default: 2.0.
    pub aabb_multiplier: f32,
    /// Reuse last step's impulses as the solver's starting guess. Default: true.
    pub warm_starting: bool,
    /// Allow bodies to fall asleep. Default: true.
    pub allow_sleep: bool,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 4,
            velocity_iterations: 8,
            position_iterations: 4,
            linear_slop: 0.001,
            baumgarte: 0.2,
            max_linear_correction: 0.2,
            velocity_threshold: 1.0,
            linear_sleep_threshold: 0.1,
            angular_sleep_threshold: 0.05,
            time_to_sleep: 0.0,
            aabb_margin: 0.1,
            aabb_multiplier: 2.0,
            warm_starting: true,
            allow_sleep: true,
        }
    }
}

/// Per-step timing data handed to the island solver.
#[derive(Debug, Clone, Copy)]
pub struct TimeStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// `dt / previous dt`, used to rescale warm-started impulses.
    pub dt_ratio: f32,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
    pub warm_starting: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = PhysicsSettings::default();
        assert_eq!(settings.gravity, Vec3::new(0.0, -9.81, 0.0));
        assert!((settings.fixed_timestep - 1.0 / 60.0).abs() < 1e-10);
        assert_eq!(settings.max_substeps, 4);
        assert_eq!(settings.velocity_iterations, 8);
        assert_eq!(settings.position_iterations, 4);
        assert!((settings.linear_slop - 0.001).abs() < 1e-9);
        assert!(settings.warm_starting);
        assert_eq!(settings.time_to_sleep, 0.0);
    }
}
