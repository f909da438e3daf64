//! Aegis Index - Secondary Indexes
//!
//! Derived maps kept consistent with a store's primary index. Every index
//! is rebuilt from the primary record alone and is updated inside the
//! owning store's write envelope, so a failure in any index rolls back the
//! primary write as well.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod fulltext;
pub mod spatial;

pub use fulltext::{FullTextIndex, TextAnalyzer};
pub use spatial::SpatialIndex;

use aegis_common::Result;

// =============================================================================
// Secondary Index Trait
// =============================================================================

/// Index over the values of a store, keyed back to encoded primary keys.
pub trait SecondaryIndex<V>: Send + Sync {
    fn name(&self) -> &str;

    fn add(&self, primary_key: &[u8], value: &V) -> Result<()>;

    fn remove(&self, primary_key: &[u8], value: &V) -> Result<()>;

    /// Replace the entries derived from `old` with those derived from `new`.
    fn update(&self, primary_key: &[u8], old: &V, new: &V) -> Result<()> {
        self.remove(primary_key, old)?;
        self.add(primary_key, new)
    }

    fn clear(&self) -> Result<()>;
}
