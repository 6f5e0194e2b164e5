//! Scene configuration

use crate::error::{PhysicsError, Result};
use serde::{Deserialize, Serialize};

/// Scene configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Gravity vector (default: -9.81 in Y)
    pub gravity: [f32; 3],

    /// Solver iterations per step
    pub solver_iterations: usize,

    /// Enable continuous collision detection on dynamic bodies by default
    pub ccd_enabled: bool,

    /// Initial capacity of the growable query result buffers
    pub query_buffer_capacity: usize,

    /// Number of drivable surface slots the tire friction table can hold
    pub max_drivable_surfaces: usize,

    /// Worker thread hint for a parallel backend build (0 = backend default).
    ///
    /// The backend is built serial, so scenes step on the calling thread and a
    /// non-zero hint only produces a warning. Results never depend on it.
    pub worker_threads: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            solver_iterations: 4,
            ccd_enabled: true,
            query_buffer_capacity: 32,
            max_drivable_surfaces: 64,
            worker_threads: 0,
        }
    }
}

impl SceneConfig {
    /// Set gravity
    pub fn with_gravity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.gravity = [x, y, z];
        self
    }

    /// Set the initial query buffer capacity
    pub fn with_query_buffer_capacity(mut self, capacity: usize) -> Self {
        self.query_buffer_capacity = capacity;
        self
    }

    /// Set the drivable surface slot count
    pub fn with_max_drivable_surfaces(mut self, slots: usize) -> Self {
        self.max_drivable_surfaces = slots;
        self
    }

    /// Set the worker thread hint
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Check the configuration before a scene is built from it
    pub fn validate(&self) -> Result<()> {
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(PhysicsError::InvalidConfig("gravity must be finite".into()));
        }
        if self.solver_iterations == 0 {
            return Err(PhysicsError::InvalidConfig(
                "solver_iterations must be at least 1".into(),
            ));
        }
        if self.query_buffer_capacity == 0 {
            return Err(PhysicsError::InvalidConfig(
                "query_buffer_capacity must be at least 1".into(),
            ));
        }
        if self.max_drivable_surfaces == 0 {
            return Err(PhysicsError::InvalidConfig(
                "max_drivable_surfaces must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SceneConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let config = SceneConfig::default().with_query_buffer_capacity(0);
        assert!(matches!(config.validate(), Err(PhysicsError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{
            "gravity": [0.0, -1.62, 0.0],
            "solver_iterations": 8,
            "ccd_enabled": false,
            "query_buffer_capacity": 4,
            "max_drivable_surfaces": 16,
            "worker_threads": 2
        }"#;
        let config: SceneConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver_iterations, 8);
        assert_eq!(config.query_buffer_capacity, 4);
        assert_eq!(config.worker_threads, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_hint_is_valid_at_any_count() {
        for threads in [0, 1, 64] {
            let config = SceneConfig::default().with_worker_threads(threads);
            assert_eq!(config.worker_threads, threads);
            assert!(config.validate().is_ok());
        }
    }
}
