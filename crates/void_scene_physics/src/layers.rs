//! Contact groups and the pairwise group collision matrix

use crate::error::{PhysicsError, Result};
use serde::{Deserialize, Serialize};

/// Number of contact groups a shape can be tagged with
pub const MAX_CONTACT_GROUPS: u32 = 32;

/// A contact group identifier, always `< MAX_CONTACT_GROUPS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactGroup(u8);

impl ContactGroup {
    /// Default group
    pub const DEFAULT: Self = Self(0);

    /// Create a group, validating the index
    pub fn new(index: u32) -> Result<Self> {
        if index < MAX_CONTACT_GROUPS {
            Ok(Self(index as u8))
        } else {
            Err(PhysicsError::InvalidGroup(index))
        }
    }

    /// Group index
    pub fn index(self) -> u32 {
        u32::from(self.0)
    }

    /// Get the group as a bitmask
    pub fn as_mask(self) -> u32 {
        1 << self.0
    }

    /// Rebuild from the low bits of packed filter data
    pub(crate) fn from_bits_truncate(bits: u32) -> Self {
        Self((bits % MAX_CONTACT_GROUPS) as u8)
    }
}

impl Default for ContactGroup {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Symmetric 32x32 group collision table.
///
/// Row `i` is a bitmask of the groups that `i` may collide with. Every write
/// updates both `(i, j)` and `(j, i)`, so the table is symmetric at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroupMatrix {
    rows: [u32; MAX_CONTACT_GROUPS as usize],
}

impl Default for ContactGroupMatrix {
    fn default() -> Self {
        Self {
            rows: [u32::MAX; MAX_CONTACT_GROUPS as usize],
        }
    }
}

impl ContactGroupMatrix {
    /// Create a matrix with every pair enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable collision between two groups
    pub fn set_group_pair_enabled(&mut self, g1: u32, g2: u32, enabled: bool) -> Result<()> {
        let a = ContactGroup::new(g1)?;
        let b = ContactGroup::new(g2)?;
        self.set_pair(a, b, enabled);
        Ok(())
    }

    /// Typed variant of [`Self::set_group_pair_enabled`]
    pub fn set_pair(&mut self, a: ContactGroup, b: ContactGroup, enabled: bool) {
        if enabled {
            self.rows[a.0 as usize] |= b.as_mask();
            self.rows[b.0 as usize] |= a.as_mask();
        } else {
            self.rows[a.0 as usize] &= !b.as_mask();
            self.rows[b.0 as usize] &= !a.as_mask();
        }
    }

    /// Check whether two groups may collide
    pub fn is_group_pair_enabled(&self, g1: u32, g2: u32) -> Result<bool> {
        let a = ContactGroup::new(g1)?;
        let b = ContactGroup::new(g2)?;
        Ok(self.pair_enabled(a, b))
    }

    /// Typed O(1) lookup used by the pair filter
    #[inline]
    pub fn pair_enabled(&self, a: ContactGroup, b: ContactGroup) -> bool {
        self.rows[a.0 as usize] & b.as_mask() != 0
    }

    /// Bitmask of groups `group` collides with
    pub fn row(&self, group: ContactGroup) -> u32 {
        self.rows[group.0 as usize]
    }

    /// Re-enable every pair
    pub fn reset(&mut self) {
        self.rows = [u32::MAX; MAX_CONTACT_GROUPS as usize];
    }
}
