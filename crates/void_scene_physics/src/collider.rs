//! Shapes, their geometry, and the packed filter data read by the pair filter

use crate::body::BodyId;
use crate::error::{PhysicsError, Result};
use crate::layers::ContactGroup;
use crate::material::MaterialId;
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scene-unique shape identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeId(pub(crate) u64);

impl ShapeId {
    /// Raw identity value
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Collision geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShapeGeometry {
    /// Sphere with radius
    Sphere {
        radius: f32,
    },
    /// Box with half-extents
    Box {
        half_extents: [f32; 3],
    },
    /// Capsule aligned along Y axis
    Capsule {
        half_height: f32,
        radius: f32,
    },
    /// Convex hull from points
    ConvexHull {
        points: Vec<[f32; 3]>,
    },
    /// Triangle mesh
    TriMesh {
        vertices: Vec<[f32; 3]>,
        indices: Vec<[u32; 3]>,
    },
    /// Heightfield terrain
    HeightField {
        heights: Vec<f32>,
        rows: usize,
        cols: usize,
        scale: [f32; 3],
    },
}

impl Default for ShapeGeometry {
    fn default() -> Self {
        Self::Box {
            half_extents: [0.5, 0.5, 0.5],
        }
    }
}

impl ShapeGeometry {
    /// Create a sphere shape
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere { radius }
    }

    /// Create a box shape from half-extents
    pub fn cuboid(hx: f32, hy: f32, hz: f32) -> Self {
        Self::Box {
            half_extents: [hx, hy, hz],
        }
    }

    /// Create a capsule shape (Y-aligned)
    pub fn capsule(half_height: f32, radius: f32) -> Self {
        Self::Capsule { half_height, radius }
    }

    /// Convex hull of a wheel-like cylinder around the X axis
    pub fn wheel_hull(radius: f32, width: f32, segments: usize) -> Self {
        let segments = segments.max(3);
        let mut points = Vec::with_capacity(segments * 2);
        for i in 0..segments {
            let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
            let (s, c) = angle.sin_cos();
            points.push([-width * 0.5, radius * s, radius * c]);
            points.push([width * 0.5, radius * s, radius * c]);
        }
        Self::ConvexHull { points }
    }

    /// True for shapes where the broadphase reports the shape but not the
    /// individual triangle or cell
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::TriMesh { .. } | Self::HeightField { .. })
    }

    fn check(&self) -> Result<()> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let ok = match self {
            Self::Sphere { radius } => positive(*radius),
            Self::Box { half_extents } => half_extents.iter().all(|h| positive(*h)),
            Self::Capsule { half_height, radius } => positive(*radius) && *half_height >= 0.0,
            Self::ConvexHull { points } => points.len() >= 4,
            Self::TriMesh { vertices, indices } => {
                !indices.is_empty()
                    && indices
                        .iter()
                        .flatten()
                        .all(|i| (*i as usize) < vertices.len())
            }
            Self::HeightField {
                heights,
                rows,
                cols,
                ..
            } => *rows >= 2 && *cols >= 2 && heights.len() == rows * cols,
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::ShapeCreationFailed(format!(
                "degenerate geometry: {:?}",
                self.kind()
            )))
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Sphere { .. } => "sphere",
            Self::Box { .. } => "box",
            Self::Capsule { .. } => "capsule",
            Self::ConvexHull { .. } => "convex hull",
            Self::TriMesh { .. } => "triangle mesh",
            Self::HeightField { .. } => "heightfield",
        }
    }

    /// Build a Rapier shared shape
    pub(crate) fn to_rapier(&self) -> Result<rapier::SharedShape> {
        self.check()?;
        let shape = match self {
            Self::Sphere { radius } => rapier::SharedShape::ball(*radius),
            Self::Box { half_extents } => {
                rapier::SharedShape::cuboid(half_extents[0], half_extents[1], half_extents[2])
            }
            Self::Capsule { half_height, radius } => {
                rapier::SharedShape::capsule_y(*half_height, *radius)
            }
            Self::ConvexHull { points } => {
                let rapier_points: Vec<_> = points
                    .iter()
                    .map(|p| rapier::Point::new(p[0], p[1], p[2]))
                    .collect();
                rapier::SharedShape::convex_hull(&rapier_points).ok_or_else(|| {
                    PhysicsError::ShapeCreationFailed("convex hull computation failed".into())
                })?
            }
            Self::TriMesh { vertices, indices } => {
                let rapier_verts: Vec<_> = vertices
                    .iter()
                    .map(|v| rapier::Point::new(v[0], v[1], v[2]))
                    .collect();
                rapier::SharedShape::trimesh(rapier_verts, indices.clone())
            }
            Self::HeightField {
                heights,
                rows,
                cols,
                scale,
            } => {
                let matrix = rapier::nalgebra::DMatrix::from_row_slice(*rows, *cols, heights);
                rapier::SharedShape::heightfield(
                    matrix,
                    rapier::Vector::new(scale[0], scale[1], scale[2]),
                )
            }
        };
        Ok(shape)
    }
}

/// Description for attaching a shape to a body
#[derive(Debug, Clone)]
pub struct ShapeDesc {
    /// Collision geometry
    pub geometry: ShapeGeometry,
    /// Position offset from the body
    pub position_offset: [f32; 3],
    /// Rotation offset (quaternion: x, y, z, w)
    pub rotation_offset: [f32; 4],
    /// Materials, first entry drives the backend friction/restitution
    pub materials: Vec<MaterialId>,
    /// Contact group index (0..32)
    pub group: u32,
    /// Trigger volume: overlap events only, no contact response
    pub trigger: bool,
    /// Density used for mass computation
    pub density: f32,
    /// Maps backend triangle order to the caller's original triangle order
    pub face_remap: Option<Vec<u32>>,
}

impl Default for ShapeDesc {
    fn default() -> Self {
        Self {
            geometry: ShapeGeometry::default(),
            position_offset: [0.0, 0.0, 0.0],
            rotation_offset: [0.0, 0.0, 0.0, 1.0],
            materials: Vec::new(),
            group: 0,
            trigger: false,
            density: 1.0,
            face_remap: None,
        }
    }
}

impl ShapeDesc {
    /// Create a new shape description
    pub fn new(geometry: ShapeGeometry) -> Self {
        Self {
            geometry,
            ..Default::default()
        }
    }

    /// Create a trigger volume description
    pub fn trigger(geometry: ShapeGeometry) -> Self {
        Self {
            geometry,
            trigger: true,
            ..Default::default()
        }
    }

    /// Set position offset
    pub fn with_offset(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position_offset = [x, y, z];
        self
    }

    /// Set rotation offset (quaternion: x, y, z, w)
    pub fn with_rotation(mut self, rotation: [f32; 4]) -> Self {
        self.rotation_offset = rotation;
        self
    }

    /// Add a material reference
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.materials.push(material);
        self
    }

    /// Set contact group
    pub fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    /// Set density
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density.max(0.0);
        self
    }

    /// Set triangle remap table
    pub fn with_face_remap(mut self, remap: Vec<u32>) -> Self {
        self.face_remap = Some(remap);
        self
    }

    pub(crate) fn local_pose(&self) -> Result<rapier::Isometry<f32>> {
        let [x, y, z, w] = self.rotation_offset;
        let norm = (x * x + y * y + z * z + w * w).sqrt();
        if !norm.is_finite() || norm < 1e-6 {
            return Err(PhysicsError::InvalidConfig(
                "shape rotation is not a valid quaternion".into(),
            ));
        }
        if self.position_offset.iter().any(|v| !v.is_finite()) {
            return Err(PhysicsError::InvalidConfig(
                "shape offset must be finite".into(),
            ));
        }
        Ok(rapier::Isometry::from_parts(
            rapier::Translation::new(
                self.position_offset[0],
                self.position_offset[1],
                self.position_offset[2],
            ),
            UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)),
        ))
    }
}

/// Flag bits carried in [`FilterData`]
pub mod filter_flags {
    /// Shape is a vehicle wheel
    pub const WHEEL: u8 = 1 << 0;
    /// Shape carries at least one drivable material
    pub const DRIVABLE: u8 = 1 << 1;
    /// Shape is a trigger volume
    pub const TRIGGER: u8 = 1 << 2;
}

/// Per-shape data the backend hands back to the pair filter.
///
/// Packed into the collider's 128-bit user data as four 32-bit words:
/// identity low, identity high, contact group, flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterData {
    /// Owning shape
    pub shape: ShapeId,
    /// Contact group
    pub group: ContactGroup,
    /// Bits from [`filter_flags`]
    pub flags: u8,
}

impl FilterData {
    /// Pack into four words
    pub fn to_words(self) -> [u32; 4] {
        [
            self.shape.0 as u32,
            (self.shape.0 >> 32) as u32,
            self.group.index(),
            u32::from(self.flags),
        ]
    }

    /// Unpack from four words
    pub fn from_words(words: [u32; 4]) -> Self {
        Self {
            shape: ShapeId(u64::from(words[0]) | (u64::from(words[1]) << 32)),
            group: ContactGroup::from_bits_truncate(words[2]),
            flags: words[3] as u8,
        }
    }

    /// Pack into collider user data
    pub fn pack(self) -> u128 {
        let w = self.to_words();
        u128::from(w[0]) | (u128::from(w[1]) << 32) | (u128::from(w[2]) << 64) | (u128::from(w[3]) << 96)
    }

    /// Unpack collider user data
    #[inline]
    pub fn unpack(data: u128) -> Self {
        Self::from_words([
            data as u32,
            (data >> 32) as u32,
            (data >> 64) as u32,
            (data >> 96) as u32,
        ])
    }

    /// Whether the shape is a wheel
    #[inline]
    pub fn is_wheel(self) -> bool {
        self.flags & filter_flags::WHEEL != 0
    }

    /// Whether the shape carries drivable material
    #[inline]
    pub fn is_drivable(self) -> bool {
        self.flags & filter_flags::DRIVABLE != 0
    }

    /// Whether the shape is a trigger volume
    #[inline]
    pub fn is_trigger(self) -> bool {
        self.flags & filter_flags::TRIGGER != 0
    }
}

/// A shape attached to a body
#[derive(Debug, Clone)]
pub struct Shape {
    pub(crate) id: ShapeId,
    pub(crate) body: BodyId,
    pub(crate) collider: rapier::ColliderHandle,
    pub(crate) materials: Vec<MaterialId>,
    pub(crate) group: ContactGroup,
    pub(crate) trigger: bool,
    pub(crate) drivable: bool,
    pub(crate) is_wheel: bool,
    pub(crate) composite: bool,
    pub(crate) face_remap: Option<Arc<[u32]>>,
}

impl Shape {
    /// Shape identity
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Owning body
    pub fn body(&self) -> BodyId {
        self.body
    }

    /// Material references, in attachment order
    pub fn materials(&self) -> &[MaterialId] {
        &self.materials
    }

    /// Contact group
    pub fn group(&self) -> ContactGroup {
        self.group
    }

    /// Whether this is a trigger volume
    pub fn is_trigger(&self) -> bool {
        self.trigger
    }

    /// Whether any material on this shape is drivable
    pub fn is_drivable(&self) -> bool {
        self.drivable
    }

    /// Whether a vehicle currently uses this shape as a wheel
    pub fn is_wheel(&self) -> bool {
        self.is_wheel
    }

    /// Current filter data
    pub fn filter_data(&self) -> FilterData {
        let mut flags = 0;
        if self.is_wheel {
            flags |= filter_flags::WHEEL;
        }
        if self.drivable {
            flags |= filter_flags::DRIVABLE;
        }
        if self.trigger {
            flags |= filter_flags::TRIGGER;
        }
        FilterData {
            shape: self.id,
            group: self.group,
            flags,
        }
    }

    /// Translate a backend face index into the caller's triangle order
    pub fn remap_face(&self, face: u32) -> u32 {
        self.face_remap
            .as_deref()
            .and_then(|table| table.get(face as usize).copied())
            .unwrap_or(face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_data_pack_preserves_high_id_bits() {
        let data = FilterData {
            shape: ShapeId(0xDEAD_BEEF_0000_0007),
            group: ContactGroup::new(31).unwrap(),
            flags: filter_flags::WHEEL | filter_flags::TRIGGER,
        };
        let words = data.to_words();
        assert_eq!(words[0], 7);
        assert_eq!(words[1], 0xDEAD_BEEF);
        let back = FilterData::unpack(data.pack());
        assert_eq!(back, data);
        assert!(back.is_wheel());
        assert!(back.is_trigger());
        assert!(!back.is_drivable());
    }

    #[test]
    fn test_degenerate_geometry_rejected() {
        assert!(ShapeGeometry::sphere(0.0).to_rapier().is_err());
        assert!(ShapeGeometry::cuboid(1.0, -1.0, 1.0).to_rapier().is_err());
        let bad_mesh = ShapeGeometry::TriMesh {
            vertices: vec![[0.0; 3]; 3],
            indices: vec![[0, 1, 5]],
        };
        assert!(bad_mesh.to_rapier().is_err());
        assert!(ShapeGeometry::wheel_hull(0.4, 0.3, 12).to_rapier().is_ok());
    }

    #[test]
    fn test_malformed_rotation_rejected() {
        let desc = ShapeDesc::new(ShapeGeometry::sphere(1.0)).with_rotation([0.0; 4]);
        assert!(desc.local_pose().is_err());
    }
}
