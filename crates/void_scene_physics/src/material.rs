//! Physics materials and the reference-counted material pool

use crate::error::{PhysicsError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Surface properties of a material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Static friction coefficient
    pub static_friction: f32,
    /// Dynamic friction coefficient
    pub dynamic_friction: f32,
    /// Restitution/bounciness (0 = no bounce, 1 = perfect bounce)
    pub restitution: f32,
    /// Display name, also used to look up tire friction
    pub name: String,
    /// Whether vehicles treat this material as drivable ground
    pub drivable: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            static_friction: 0.5,
            dynamic_friction: 0.5,
            restitution: 0.0,
            name: String::new(),
            drivable: false,
        }
    }
}

impl Material {
    /// Create a new material
    pub fn new(static_friction: f32, dynamic_friction: f32, restitution: f32) -> Self {
        Self {
            static_friction,
            dynamic_friction,
            restitution,
            ..Default::default()
        }
    }

    /// Asphalt-like drivable surface
    pub fn asphalt() -> Self {
        Self::new(0.9, 0.8, 0.05).named("asphalt").with_drivable(true)
    }

    /// Loose gravel drivable surface
    pub fn gravel() -> Self {
        Self::new(0.6, 0.5, 0.0).named("gravel").with_drivable(true)
    }

    /// Ice surface
    pub fn ice() -> Self {
        Self::new(0.1, 0.05, 0.0).named("ice").with_drivable(true)
    }

    /// Rubber, the usual tire material
    pub fn rubber() -> Self {
        Self::new(1.0, 0.9, 0.3).named("rubber")
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the drivable flag
    pub fn with_drivable(mut self, drivable: bool) -> Self {
        self.drivable = drivable;
        self
    }

    /// Deterministic pooling key derived from every field
    pub fn key(&self) -> MaterialKey {
        MaterialKey {
            static_friction: self.static_friction.to_bits(),
            dynamic_friction: self.dynamic_friction.to_bits(),
            restitution: self.restitution.to_bits(),
            name: self.name.clone(),
            drivable: self.drivable,
        }
    }
}

/// Pooling key: the bit patterns of a material's fields
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialKey {
    static_friction: u32,
    dynamic_friction: u32,
    restitution: u32,
    name: String,
    drivable: bool,
}

/// Handle to a pooled material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId {
    index: u32,
    generation: u32,
}

struct PoolEntry {
    material: Material,
    key: MaterialKey,
    ref_count: usize,
    generation: u32,
}

#[derive(Default)]
struct PoolInner {
    slots: Vec<Option<PoolEntry>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    by_key: HashMap<MaterialKey, MaterialId>,
    drivable: BTreeSet<MaterialId>,
}

impl PoolInner {
    fn entry(&self, id: MaterialId) -> Option<&PoolEntry> {
        self.slots
            .get(id.index as usize)
            .and_then(Option::as_ref)
            .filter(|e| e.generation == id.generation)
    }

    fn entry_mut(&mut self, id: MaterialId) -> Option<&mut PoolEntry> {
        self.slots
            .get_mut(id.index as usize)
            .and_then(Option::as_mut)
            .filter(|e| e.generation == id.generation)
    }
}

/// Pool mapping identical material tuples to one shared, reference-counted
/// instance.
///
/// All bookkeeping is serialized behind one lock; the drivable version counter
/// can be read without it.
pub struct MaterialPool {
    inner: Mutex<PoolInner>,
    drivable_version: AtomicU64,
}

impl Default for MaterialPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            drivable_version: AtomicU64::new(0),
        }
    }

    /// Get or create the instance for `material`, adding one reference
    pub fn alloc(&self, material: Material) -> MaterialId {
        let key = material.key();
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.by_key.get(&key) {
            if let Some(entry) = inner.entry_mut(id) {
                entry.ref_count += 1;
                return id;
            }
        }

        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(None);
                inner.generations.push(0);
                (inner.slots.len() - 1) as u32
            }
        };
        let generation = inner.generations[index as usize];
        let id = MaterialId { index, generation };
        let drivable = material.drivable;

        log::debug!("Material '{}' created as {:?}", material.name, id);
        inner.slots[index as usize] = Some(PoolEntry {
            material,
            key: key.clone(),
            ref_count: 1,
            generation,
        });
        inner.by_key.insert(key, id);

        if drivable {
            inner.drivable.insert(id);
            self.drivable_version.fetch_add(1, Ordering::Release);
        }
        id
    }

    /// Add a reference to an existing instance
    pub fn acquire(&self, id: MaterialId) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entry_mut(id)
            .ok_or(PhysicsError::MaterialNotFound(id))?;
        entry.ref_count += 1;
        Ok(())
    }

    /// Drop one reference. Returns true when the instance was destroyed.
    pub fn free(&self, id: MaterialId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entry_mut(id)
            .ok_or(PhysicsError::MaterialNotFound(id))?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Ok(false);
        }

        let Some(entry) = inner.slots[id.index as usize].take() else {
            return Ok(false);
        };
        inner.by_key.remove(&entry.key);
        inner.generations[id.index as usize] = entry.generation.wrapping_add(1);
        inner.free.push(id.index);
        if inner.drivable.remove(&id) {
            self.drivable_version.fetch_add(1, Ordering::Release);
        }
        log::debug!("Material '{}' ({:?}) destroyed", entry.material.name, id);
        Ok(true)
    }

    /// Copy of a live material
    pub fn get(&self, id: MaterialId) -> Option<Material> {
        self.inner.lock().entry(id).map(|e| e.material.clone())
    }

    /// Whether the material is live and drivable
    pub fn is_drivable(&self, id: MaterialId) -> bool {
        self.inner.lock().drivable.contains(&id)
    }

    /// Current reference count (0 for dead handles)
    pub fn ref_count(&self, id: MaterialId) -> usize {
        self.inner.lock().entry(id).map_or(0, |e| e.ref_count)
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.inner.lock().by_key.len()
    }

    /// Check if the pool holds no material
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped whenever a drivable material is created or destroyed
    pub fn drivable_version(&self) -> u64 {
        self.drivable_version.load(Ordering::Acquire)
    }

    /// Snapshot of drivable materials in handle order, with the version it
    /// corresponds to
    pub fn drivable_snapshot(&self) -> (u64, Vec<(MaterialId, Material)>) {
        let inner = self.inner.lock();
        let version = self.drivable_version();
        let materials = inner
            .drivable
            .iter()
            .filter_map(|id| inner.entry(*id).map(|e| (*id, e.material.clone())))
            .collect();
        (version, materials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_tuples_share_instance() {
        let pool = MaterialPool::new();
        let a = pool.alloc(Material::new(0.5, 0.4, 0.1).named("wood"));
        let b = pool.alloc(Material::new(0.5, 0.4, 0.1).named("wood"));
        assert_eq!(a, b);
        assert_eq!(pool.ref_count(a), 2);
        assert_eq!(pool.len(), 1);

        assert!(!pool.free(a).unwrap());
        assert!(pool.get(a).is_some());
        assert!(pool.free(b).unwrap());
        assert!(pool.get(a).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_different_fields_different_instances() {
        let pool = MaterialPool::new();
        let a = pool.alloc(Material::new(0.5, 0.4, 0.1));
        let b = pool.alloc(Material::new(0.5, 0.4, 0.1).with_drivable(true));
        let c = pool.alloc(Material::new(0.5, 0.4, 0.1).named("x"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let pool = MaterialPool::new();
        let a = pool.alloc(Material::rubber());
        pool.free(a).unwrap();
        let b = pool.alloc(Material::ice());
        assert_ne!(a, b);
        assert!(matches!(pool.free(a), Err(PhysicsError::MaterialNotFound(_))));
        assert!(pool.acquire(a).is_err());
        assert_eq!(pool.ref_count(b), 1);
    }

    #[test]
    fn test_drivable_version_tracks_membership() {
        let pool = MaterialPool::new();
        let v0 = pool.drivable_version();

        let rubber = pool.alloc(Material::rubber());
        assert_eq!(pool.drivable_version(), v0);

        let asphalt = pool.alloc(Material::asphalt());
        let v1 = pool.drivable_version();
        assert!(v1 > v0);

        // Extra reference does not change membership
        pool.alloc(Material::asphalt());
        assert_eq!(pool.drivable_version(), v1);
        pool.free(asphalt).unwrap();
        assert_eq!(pool.drivable_version(), v1);

        pool.free(asphalt).unwrap();
        assert!(pool.drivable_version() > v1);
        assert!(!pool.is_drivable(asphalt));
        assert!(pool.drivable_snapshot().1.is_empty());
        pool.free(rubber).unwrap();
    }
}
