//! Tire-type by surface friction table, rebuilt only when the drivable
//! material set changes

use crate::error::{PhysicsError, Result};
use crate::material::{MaterialId, MaterialPool};
use crate::vehicle::params::TireFrictionParams;
use std::collections::HashMap;

/// Friction multipliers indexed by `[tire_type][surface]`
#[derive(Debug, Clone)]
pub struct TireFrictionTable {
    built_version: Option<u64>,
    capacity: usize,
    tire_types: usize,
    surfaces: Vec<MaterialId>,
    slots: HashMap<MaterialId, usize>,
    values: Vec<f32>,
    fallback: Vec<f32>,
    rebuilds: u64,
}

impl TireFrictionTable {
    /// Empty table holding at most `capacity` surfaces
    pub fn new(capacity: usize, params: &TireFrictionParams) -> Self {
        let fallback = params
            .tire_type_scales
            .iter()
            .map(|scale| scale * params.wildcard)
            .collect();
        Self {
            built_version: None,
            capacity,
            tire_types: params.tire_type_scales.len().max(1),
            surfaces: Vec::new(),
            slots: HashMap::new(),
            values: Vec::new(),
            fallback,
            rebuilds: 0,
        }
    }

    /// Whether the pool's drivable set moved since the last build
    pub fn is_stale(&self, pool: &MaterialPool) -> bool {
        self.built_version != Some(pool.drivable_version())
    }

    /// Rebuild from the pool if stale. Returns true when a rebuild happened.
    pub fn refresh(&mut self, pool: &MaterialPool, params: &TireFrictionParams) -> Result<bool> {
        if !self.is_stale(pool) {
            return Ok(false);
        }

        let (version, drivable) = pool.drivable_snapshot();
        if drivable.len() > self.capacity {
            return Err(PhysicsError::CapacityExceeded {
                what: "drivable surfaces",
                requested: drivable.len(),
                limit: self.capacity,
            });
        }

        self.surfaces.clear();
        self.slots.clear();
        self.values.clear();
        self.values.resize(self.tire_types * drivable.len(), 0.0);

        for (slot, (id, material)) in drivable.iter().enumerate() {
            self.surfaces.push(*id);
            self.slots.insert(*id, slot);
            let surface = params.surface(&material.name);
            for tire in 0..self.tire_types {
                let scale = params.tire_type_scales.get(tire).copied().unwrap_or(1.0);
                self.values[tire * drivable.len() + slot] = surface * scale;
            }
        }

        self.built_version = Some(version);
        self.rebuilds += 1;
        log::debug!(
            "Tire friction table rebuilt: {} surfaces x {} tire types (version {})",
            self.surfaces.len(),
            self.tire_types,
            version
        );
        Ok(true)
    }

    /// Multiplier for `tire_type` on `surface`. Surfaces outside the table
    /// use the wildcard entry.
    pub fn friction(&self, tire_type: usize, surface: Option<MaterialId>) -> f32 {
        let tire = tire_type.min(self.tire_types - 1);
        match surface.and_then(|id| self.slots.get(&id)) {
            Some(&slot) => self.values[tire * self.surfaces.len() + slot],
            None => self.fallback.get(tire).copied().unwrap_or(1.0),
        }
    }

    /// Drivable surfaces in table order
    pub fn surfaces(&self) -> &[MaterialId] {
        &self.surfaces
    }

    /// How many times the table has been rebuilt
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::Material;
    use crate::vehicle::params::{VehicleParams, VehicleTables, WILDCARD_SURFACE};

    fn params() -> TireFrictionParams {
        let params = VehicleParams::sedan()
            .with_surface_friction("ice", 0.1)
            .with_surface_friction(WILDCARD_SURFACE, 0.9)
            .with("tire_type_count", 2.0)
            .with("tire_type_scale_1", 2.0);
        VehicleTables::from_params(&params).unwrap().friction
    }

    #[test]
    fn test_rebuild_only_on_version_change() {
        let pool = MaterialPool::new();
        let params = params();
        let mut table = TireFrictionTable::new(8, &params);

        let asphalt = pool.alloc(Material::asphalt());
        assert!(table.refresh(&pool, &params).unwrap());
        assert!(!table.refresh(&pool, &params).unwrap());
        assert_eq!(table.rebuild_count(), 1);

        // Non-drivable materials leave the table alone
        pool.alloc(Material::rubber());
        assert!(!table.refresh(&pool, &params).unwrap());

        let ice = pool.alloc(Material::ice());
        assert!(table.refresh(&pool, &params).unwrap());
        assert_eq!(table.rebuild_count(), 2);
        assert_eq!(table.surfaces(), &[asphalt, ice]);
    }

    #[test]
    fn test_lookup_by_tire_type_and_surface() {
        let pool = MaterialPool::new();
        let params = params();
        let mut table = TireFrictionTable::new(8, &params);
        let ice = pool.alloc(Material::ice());
        let gravel = pool.alloc(Material::gravel());
        table.refresh(&pool, &params).unwrap();

        assert!((table.friction(0, Some(ice)) - 0.1).abs() < 1e-6);
        assert!((table.friction(1, Some(ice)) - 0.2).abs() < 1e-6);
        assert!((table.friction(0, Some(gravel)) - 0.9).abs() < 1e-6);
        assert!((table.friction(1, None) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_exceeded() {
        let pool = MaterialPool::new();
        let params = params();
        let mut table = TireFrictionTable::new(1, &params);
        pool.alloc(Material::asphalt());
        pool.alloc(Material::gravel());
        assert!(matches!(
            table.refresh(&pool, &params),
            Err(PhysicsError::CapacityExceeded { limit: 1, requested: 2, .. })
        ));
    }
}
