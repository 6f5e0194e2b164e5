//! Void Scene Physics - collision filtering, spatial queries and vehicles on Rapier 3D
//!
//! This crate sits between gameplay code and the Rapier backend. It decides
//! which shape pairs may touch, answers ray and overlap questions, and runs
//! raycast vehicles on top of rigid bodies.
//!
//! # Features
//!
//! - 32 contact groups with a symmetric group-pair table
//! - Per-shape-pair suppression that cleans itself up when shapes go away
//! - Trigger volumes and wheel-vs-road filtering in one pair filter
//! - Single and piercing ray casts with per-triangle hits on meshes and heightfields
//! - Box, sphere and capsule overlap probes
//! - Reference-counted material pool shared across scenes
//! - Raycast vehicles with input smoothing, gears and per-surface tire friction
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     PhysicsScene                       │
//! │  ┌──────────────────┐  ┌────────────────────────────┐  │
//! │  │ContactGroupMatrix│  │ ShapeSuppressionRegistry   │  │
//! │  └────────┬─────────┘  └─────────────┬──────────────┘  │
//! │           └──────── PairFilterHooks ─┘                 │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │        Rapier PhysicsPipeline / QueryPipeline    │   │
//! │  └─────────────────────────────────────────────────┘   │
//! │  ┌────────────────────┐  ┌──────────────────────────┐  │
//! │  │ SpatialQueryEngine │  │ VehicleContext (per car) │  │
//! │  └────────────────────┘  └──────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//!                          │
//!                  Arc<MaterialPool>
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_scene_physics::prelude::*;
//!
//! let mut scene = PhysicsScene::new(SceneConfig::default())?;
//!
//! let ground = scene.add_body(BodyDesc::fixed())?;
//! let asphalt = scene.alloc_material(Material::asphalt());
//! scene.add_shape(
//!     ground,
//!     ShapeDesc::new(ShapeGeometry::cuboid(50.0, 0.5, 50.0)).with_material(asphalt),
//! )?;
//!
//! scene.set_group_pair_enabled(1, 2, false)?;
//! scene.step(1.0 / 60.0)?;
//!
//! let hits = scene.ray_cast_piercing([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 100.0, u32::MAX)?;
//! ```

pub mod body;
pub mod collider;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod layers;
pub mod material;
pub mod query;
pub mod suppression;
pub mod vehicle;
pub mod world;

pub mod prelude {
    //! Common imports for scene physics
    pub use crate::body::{Body, BodyDesc, BodyId, BodyType};
    pub use crate::collider::{FilterData, Shape, ShapeDesc, ShapeGeometry, ShapeId};
    pub use crate::config::SceneConfig;
    pub use crate::error::{PhysicsError, Result};
    pub use crate::events::{ContactPoint, PairEvent, PairEventType};
    pub use crate::filter::{filter_pair, ContactFlags, PairDecision};
    pub use crate::layers::{ContactGroup, ContactGroupMatrix, MAX_CONTACT_GROUPS};
    pub use crate::material::{Material, MaterialId, MaterialPool};
    pub use crate::query::{QueryHit, SpatialQueryEngine};
    pub use crate::suppression::ShapeSuppressionRegistry;
    pub use crate::vehicle::{
        AnalogInput, Axle, DigitalInput, Gear, VehicleContext, VehicleDesc, VehicleId,
        VehicleInput, VehicleParams, VehicleState, WheelDesc, WheelTelemetry,
    };
    pub use crate::world::PhysicsScene;
}

pub use prelude::*;
