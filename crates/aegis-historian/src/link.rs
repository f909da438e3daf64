//! Aegis Links - Cross-Store References
//!
//! Narrow traits through which one store reaches another: a dependent
//! store validates foreign references through an [`EntityLookup`], an
//! owning store cascades removals into its dependents through
//! [`OwnerCascade`] and [`StreamRecords`], and nested filters are joined
//! through an [`IdResolver`]. Lookups and joins take no write lock. A
//! cascade runs the dependent's envelope inside the owner's on the shared
//! engine journal, so a failing dependent undoes the whole removal.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::{Result, TimeRange};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Read-only view of a store whose local ids other stores reference.
pub trait EntityLookup: Send + Sync {
    fn contains_internal_id(&self, id: u64) -> Result<bool>;

    /// Valid start of the version of `id` that is current now.
    fn current_valid_start(&self, id: u64) -> Result<Option<DateTime<Utc>>>;
}

/// Store holding resources owned by entities of another store.
pub trait OwnerCascade: Send + Sync {
    /// Remove everything owned by `owner_id`. Returns the number removed.
    fn remove_by_owner(&self, owner_id: u64) -> Result<u64>;
}

/// Store holding the records of channels.
pub trait StreamRecords: Send + Sync {
    /// Remove every series of `stream_id` with all of its records.
    fn remove_series(&self, stream_id: u64) -> Result<u64>;

    /// Phenomenon and result time ranges of the records of `stream_id`.
    fn time_ranges(&self, stream_id: u64) -> Result<Option<(TimeRange, TimeRange)>>;
}

/// Store that resolves a filter `F` on its resources into their local ids.
pub trait IdResolver<F>: Send + Sync {
    fn resolve_ids(&self, filter: &F) -> Result<BTreeSet<u64>>;
}

/// Restrict `ids` to `resolved`. An unset selection becomes `resolved`.
pub(crate) fn narrow_ids(ids: &mut Option<BTreeSet<u64>>, resolved: BTreeSet<u64>) {
    *ids = Some(match ids.take() {
        Some(current) => current.intersection(&resolved).copied().collect(),
        None => resolved,
    });
}
