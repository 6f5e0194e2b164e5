//! Per-shape pair suppression overrides

use crate::collider::ShapeId;
use std::collections::{HashMap, HashSet};

/// Symmetric "never collide" relation between individual shapes.
///
/// Each shape keeps the full set of its partners so that removing a shape only
/// touches the sets of the shapes it was actually paired with.
#[derive(Debug, Default, Clone)]
pub struct ShapeSuppressionRegistry {
    partners: HashMap<ShapeId, HashSet<ShapeId>>,
}

impl ShapeSuppressionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress contacts between `a` and `b`. Returns false if already suppressed.
    pub fn suppress(&mut self, a: ShapeId, b: ShapeId) -> bool {
        let inserted = self.partners.entry(a).or_default().insert(b);
        self.partners.entry(b).or_default().insert(a);
        inserted
    }

    /// Remove a suppression. Returns false if the pair was not suppressed.
    pub fn unsuppress(&mut self, a: ShapeId, b: ShapeId) -> bool {
        let removed = self.detach(a, b);
        self.detach(b, a);
        removed
    }

    /// Check whether the pair is suppressed
    #[inline]
    pub fn is_suppressed(&self, a: ShapeId, b: ShapeId) -> bool {
        self.partners.get(&a).is_some_and(|set| set.contains(&b))
    }

    /// Shapes `shape` is suppressed against
    pub fn partners(&self, shape: ShapeId) -> impl Iterator<Item = ShapeId> + '_ {
        self.partners.get(&shape).into_iter().flatten().copied()
    }

    /// Drop every pair `shape` participates in. Returns the former partners.
    pub fn remove_shape(&mut self, shape: ShapeId) -> Vec<ShapeId> {
        let Some(set) = self.partners.remove(&shape) else {
            return Vec::new();
        };
        let partners: Vec<ShapeId> = set.into_iter().collect();
        for partner in &partners {
            self.detach(*partner, shape);
        }
        partners
    }

    /// Number of shapes with at least one suppression
    pub fn len(&self) -> usize {
        self.partners.len()
    }

    /// Check if no suppression is registered
    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    fn detach(&mut self, owner: ShapeId, partner: ShapeId) -> bool {
        let Some(set) = self.partners.get_mut(&owner) else {
            return false;
        };
        let removed = set.remove(&partner);
        if set.is_empty() {
            self.partners.remove(&owner);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppress_is_symmetric() {
        let mut registry = ShapeSuppressionRegistry::new();
        let (a, b) = (ShapeId(1), ShapeId(2));
        assert!(registry.suppress(a, b));
        assert!(registry.is_suppressed(a, b));
        assert!(registry.is_suppressed(b, a));
        assert!(!registry.suppress(b, a));
    }

    #[test]
    fn test_unsuppress() {
        let mut registry = ShapeSuppressionRegistry::new();
        let (a, b) = (ShapeId(1), ShapeId(2));
        registry.suppress(a, b);
        assert!(registry.unsuppress(b, a));
        assert!(!registry.is_suppressed(a, b));
        assert!(!registry.is_suppressed(b, a));
        assert!(registry.is_empty());
        assert!(!registry.unsuppress(a, b));
    }

    #[test]
    fn test_remove_shape_cleans_partners() {
        let mut registry = ShapeSuppressionRegistry::new();
        let (a, b, c) = (ShapeId(1), ShapeId(2), ShapeId(3));
        registry.suppress(a, b);
        registry.suppress(a, c);
        registry.suppress(b, c);

        let mut partners = registry.remove_shape(a);
        partners.sort();
        assert_eq!(partners, vec![b, c]);

        assert!(!registry.is_suppressed(b, a));
        assert!(!registry.is_suppressed(c, a));
        assert!(registry.is_suppressed(b, c));
        assert!(registry.partners(b).all(|p| p != a));
        assert_eq!(registry.len(), 2);
    }
}
