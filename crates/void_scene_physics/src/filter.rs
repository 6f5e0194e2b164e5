//! Pair filtering invoked by the backend for every candidate shape pair
//!
//! Decision order, first match wins:
//!
//! 1. either shape is a trigger: trigger-only pair
//! 2. groups disabled in the [`ContactGroupMatrix`]: suppressed
//! 3. pair present in the [`ShapeSuppressionRegistry`]: suppressed
//! 4. wheel against drivable surface: suppressed (suspension raycasts own it)
//! 5. otherwise a full contact pair

use crate::collider::FilterData;
use crate::layers::ContactGroupMatrix;
use crate::suppression::ShapeSuppressionRegistry;
use rapier3d::prelude as rapier;

/// Contact reporting requested for an accepted pair.
///
/// Describes the pair to the host. The backend hook only chooses solver flags
/// per pair: touch events come from each collider's active events and swept
/// integration from each body's CCD setting, both fixed when they are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactFlags {
    /// Report when the pair starts touching
    pub touch_found: bool,
    /// Report while the pair keeps touching
    pub touch_persists: bool,
    /// Report contact points
    pub contact_points: bool,
    /// Swept integration for fast movers
    pub continuous: bool,
}

impl ContactFlags {
    /// Every flag set
    pub const FULL: Self = Self {
        touch_found: true,
        touch_persists: true,
        contact_points: true,
        continuous: true,
    };
}

/// Outcome of filtering one candidate pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairDecision {
    /// Overlap events only, no contact response
    Trigger,
    /// No contact and no trigger
    Suppress,
    /// Generate contacts
    Contact(ContactFlags),
}

impl PairDecision {
    /// Whether the pair generates contacts
    pub fn is_contact(self) -> bool {
        matches!(self, Self::Contact(_))
    }

    /// Solver flags handed back to the backend for a contact pair
    pub(crate) fn solver_flags(self) -> Option<rapier::SolverFlags> {
        match self {
            Self::Contact(_) => Some(rapier::SolverFlags::COMPUTE_IMPULSES),
            Self::Trigger | Self::Suppress => None,
        }
    }
}

/// Classify one candidate pair.
///
/// Pure and allocation-free: reads only the packed filter data, the group
/// matrix and the suppression registry.
#[inline]
pub fn filter_pair(
    a: FilterData,
    b: FilterData,
    matrix: &ContactGroupMatrix,
    suppression: &ShapeSuppressionRegistry,
) -> PairDecision {
    if a.is_trigger() || b.is_trigger() {
        return PairDecision::Trigger;
    }
    if !matrix.pair_enabled(a.group, b.group) {
        return PairDecision::Suppress;
    }
    if suppression.is_suppressed(a.shape, b.shape) {
        return PairDecision::Suppress;
    }
    if (a.is_wheel() && b.is_drivable()) || (b.is_wheel() && a.is_drivable()) {
        return PairDecision::Suppress;
    }
    PairDecision::Contact(ContactFlags::FULL)
}

/// Backend hook adapter over [`filter_pair`]
pub(crate) struct PairFilterHooks<'a> {
    pub(crate) matrix: &'a ContactGroupMatrix,
    pub(crate) suppression: &'a ShapeSuppressionRegistry,
}

impl PairFilterHooks<'_> {
    fn decide(&self, context: &rapier::PairFilterContext) -> PairDecision {
        let a = FilterData::unpack(context.colliders[context.collider1].user_data);
        let b = FilterData::unpack(context.colliders[context.collider2].user_data);
        filter_pair(a, b, self.matrix, self.suppression)
    }
}

impl rapier::PhysicsHooks for PairFilterHooks<'_> {
    fn filter_contact_pair(&self, context: &rapier::PairFilterContext) -> Option<rapier::SolverFlags> {
        self.decide(context).solver_flags()
    }

    fn filter_intersection_pair(&self, context: &rapier::PairFilterContext) -> bool {
        self.decide(context) == PairDecision::Trigger
    }
}
