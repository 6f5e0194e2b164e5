//! Error types for the scene physics layer

use thiserror::Error;

/// Scene physics errors
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Body not found
    #[error("Body not found: {0:?}")]
    BodyNotFound(crate::body::BodyId),

    /// Shape not found
    #[error("Shape not found: {0:?}")]
    ShapeNotFound(crate::collider::ShapeId),

    /// Material not found in the pool
    #[error("Material not found: {0:?}")]
    MaterialNotFound(crate::material::MaterialId),

    /// Vehicle not found
    #[error("Vehicle not found: {0:?}")]
    VehicleNotFound(crate::vehicle::VehicleId),

    /// Invalid configuration
    #[error("Invalid physics configuration: {0}")]
    InvalidConfig(String),

    /// Backend rejected the geometry
    #[error("Failed to create collision shape: {0}")]
    ShapeCreationFailed(String),

    /// Contact group index outside 0..32
    #[error("Invalid contact group {0} (must be < {max})", max = crate::layers::MAX_CONTACT_GROUPS)]
    InvalidGroup(u32),

    /// Query argument rejected before reaching the backend
    #[error("Invalid query argument: {0}")]
    InvalidArgument(String),

    /// Required named vehicle parameter is absent
    #[error("Missing required vehicle parameter '{0}'")]
    MissingParameter(String),

    /// Fixed-size backend table would overflow
    #[error("Capacity exceeded for {what}: {requested} entries, limit is {limit}")]
    CapacityExceeded {
        /// Which table overflowed
        what: &'static str,
        /// Number of entries requested
        requested: usize,
        /// Backend limit
        limit: usize,
    },

    /// Wheel/chassis layout rejected
    #[error("Invalid vehicle layout: {0}")]
    InvalidVehicle(String),

    /// Operation attempted between `simulate` and `fetch_results`
    #[error("Operation not allowed while a simulation step is in flight")]
    SimulationInFlight,
}

/// Result type for physics operations
pub type Result<T> = std::result::Result<T, PhysicsError>;
