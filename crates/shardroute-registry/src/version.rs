//! Causal versioning of topology snapshots
//!
//! Every published snapshot carries a [`TopologyVersion`]: the authority's
//! topology timestamp plus two locally maintained increments that flag
//! refresh criteria the timestamp cannot express (stashed membership updates
//! and explicitly forced reloads).

use serde::Serialize;

/// Version stamp ordering contract used by the versioned cache
///
/// `satisfies` is NOT a total order and must never be used for sorting; it
/// answers exactly one question: is the left-hand version fresh enough to
/// serve a caller that wants the right-hand one.
pub trait CausalVersion: Clone + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Whether this version is fresh enough to satisfy `wanted`
    fn satisfies(&self, wanted: &Self) -> bool;

    /// A version strictly newer in the membership component only
    #[must_use]
    fn bump_membership(&self) -> Self;

    /// A version strictly newer in the forced-reload component only
    #[must_use]
    fn bump_force(&self) -> Self;

    /// The component-wise maximum of two versions
    ///
    /// Used to advance the wanted version monotonically; no component is
    /// ever rolled back by a concurrent advance.
    #[must_use]
    fn component_max(&self, other: &Self) -> Self;
}

/// Causal version of a topology snapshot
///
/// `topology_time` is supplied by the catalog and is monotonically
/// non-decreasing. The increments are maintained locally:
/// `membership_increment` records that out-of-band membership updates are
/// stashed and not yet folded into a fetched snapshot, and
/// `force_reload_increment` forces a refresh when the authority timestamp
/// cannot be relied on to have changed (first lookup, explicit cache clear).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopologyVersion {
    topology_time: u64,
    membership_increment: u64,
    force_reload_increment: u64,
}

impl TopologyVersion {
    /// Create a version from its three components
    #[must_use]
    pub fn new(topology_time: u64, membership_increment: u64, force_reload_increment: u64) -> Self {
        Self {
            topology_time,
            membership_increment,
            force_reload_increment,
        }
    }

    /// The authority's topology timestamp
    #[must_use]
    pub fn topology_time(&self) -> u64 {
        self.topology_time
    }

    /// The local membership-update increment
    #[must_use]
    pub fn membership_increment(&self) -> u64 {
        self.membership_increment
    }

    /// The local forced-reload increment
    #[must_use]
    pub fn force_reload_increment(&self) -> u64 {
        self.force_reload_increment
    }

    /// Whether any single component of `self` is strictly newer than the
    /// corresponding component of `other`
    ///
    /// One newer component is sufficient to make `self` refresh-worthy
    /// relative to `other`. The resulting relation is neither antisymmetric
    /// nor transitive; see the tests below before reaching for it anywhere
    /// outside a freshness check.
    #[must_use]
    pub fn any_component_newer_than(&self, other: &Self) -> bool {
        self.topology_time > other.topology_time
            || self.membership_increment > other.membership_increment
            || self.force_reload_increment > other.force_reload_increment
    }
}

impl CausalVersion for TopologyVersion {
    fn satisfies(&self, wanted: &Self) -> bool {
        self == wanted || self.any_component_newer_than(wanted)
    }

    fn bump_membership(&self) -> Self {
        Self {
            membership_increment: self.membership_increment + 1,
            ..*self
        }
    }

    fn bump_force(&self) -> Self {
        Self {
            force_reload_increment: self.force_reload_increment + 1,
            ..*self
        }
    }

    fn component_max(&self, other: &Self) -> Self {
        Self {
            topology_time: self.topology_time.max(other.topology_time),
            membership_increment: self.membership_increment.max(other.membership_increment),
            force_reload_increment: self
                .force_reload_increment
                .max(other.force_reload_increment),
        }
    }
}
