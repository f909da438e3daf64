//! Aegis Spatial Index
//!
//! Bounding-box index over entity geometries. Entries are keyed by the
//! box's minimum x followed by the owning primary key, so a region query
//! only scans entries whose box starts left of the region's right edge and
//! tests the remaining edges on the stored box.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use super::SecondaryIndex;
use crate::geom::{next_up, Bbox};
use crate::model::VersionedEntity;
use crate::store::StoreCore;
use aegis_common::Result;
use aegis_storage::encoding::{get_f32_ordered, put_f32_ordered};
use aegis_storage::{MapKey, SortedMap};
use std::collections::BTreeSet;
use std::ops::Bound;

/// Float usable as a map key component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedF32(pub f32);

impl MapKey for OrderedF32 {
    fn encode_key(&self, buf: &mut Vec<u8>) {
        put_f32_ordered(buf, self.0);
    }

    fn decode_key(buf: &mut &[u8]) -> Result<Self> {
        Ok(OrderedF32(get_f32_ordered(buf)?))
    }
}

type SpatialKey = (OrderedF32, Vec<u8>);

// =============================================================================
// Spatial Index
// =============================================================================

pub struct SpatialIndex {
    name: String,
    map: SortedMap<SpatialKey, Bbox>,
}

impl SpatialIndex {
    pub fn open(core: &StoreCore, role: &str) -> Self {
        Self {
            name: core.map_name(role),
            map: core.open_map(role),
        }
    }

    pub fn len(&self) -> u64 {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Primary keys whose box intersects `region`.
    pub fn query(&self, region: &Bbox) -> Result<BTreeSet<Vec<u8>>> {
        let upper_key;
        let upper = if region.max_x.is_finite() {
            upper_key = (OrderedF32(next_up(region.max_x)), Vec::new());
            Bound::Excluded(&upper_key)
        } else {
            Bound::Unbounded
        };

        let mut keys = BTreeSet::new();
        for entry in self.map.range(Bound::Unbounded, upper) {
            let ((_, primary_key), bbox) = entry?;
            if bbox.intersects(region) {
                keys.insert(primary_key);
            }
        }
        Ok(keys)
    }

    /// Residual check used when another index drives the scan.
    pub fn value_matches<V: VersionedEntity>(value: &V, region: &Bbox) -> bool {
        value
            .geometry()
            .and_then(|g| g.bbox())
            .map(|bbox| bbox.intersects(region))
            .unwrap_or(false)
    }

    /// Envelope of every indexed box.
    pub fn extent(&self) -> Result<Option<Bbox>> {
        let mut extent: Option<Bbox> = None;
        for entry in self.map.iter() {
            let (_, bbox) = entry?;
            extent = Some(match extent {
                Some(current) => current.union(&bbox),
                None => bbox,
            });
        }
        Ok(extent)
    }
}

impl<V: VersionedEntity> SecondaryIndex<V> for SpatialIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, primary_key: &[u8], value: &V) -> Result<()> {
        if let Some(bbox) = value.geometry().and_then(|g| g.bbox()) {
            self.map.put(&(OrderedF32(bbox.min_x), primary_key.to_vec()), &bbox)?;
        }
        Ok(())
    }

    fn remove(&self, primary_key: &[u8], value: &V) -> Result<()> {
        if let Some(bbox) = value.geometry().and_then(|g| g.bbox()) {
            self.map.delete(&(OrderedF32(bbox.min_x), primary_key.to_vec()))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.map.clear()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Geometry;
    use crate::model::FeatureDesc;
    use crate::store::StoreKind;
    use aegis_common::HistorianConfig;
    use aegis_storage::MapStore;

    fn index() -> (StoreCore, SpatialIndex) {
        let engine = MapStore::in_memory();
        let core = StoreCore::open(&engine, "geo", "@feature", StoreKind::Entities, &HistorianConfig::default())
            .expect("open should succeed");
        let index = SpatialIndex::open(&core, "_spatial");
        (core, index)
    }

    fn feature(uid: &str, x: f64, y: f64) -> FeatureDesc {
        FeatureDesc::new(uid, uid).with_geometry(Geometry::point(x, y))
    }

    #[test]
    fn test_region_query() {
        let (core, index) = index();
        core.atomically("index", || {
            SecondaryIndex::add(&index, b"a", &feature("a", 1.0, 1.0))?;
            SecondaryIndex::add(&index, b"b", &feature("b", 5.0, 5.0))?;
            SecondaryIndex::add(&index, b"c", &feature("c", 10.0, 1.0))?;
            SecondaryIndex::<FeatureDesc>::add(&index, b"d", &FeatureDesc::new("d", "no geometry"))
        })
        .expect("add should succeed");
        assert_eq!(index.len(), 3);

        let hits = index.query(&Bbox::new(0.0, 0.0, 5.0, 5.0)).expect("query should succeed");
        assert_eq!(hits, [b"a".to_vec(), b"b".to_vec()].into_iter().collect());

        let edge = index.query(&Bbox::new(10.0, 1.0, 10.0, 1.0)).expect("query should succeed");
        assert_eq!(edge, [b"c".to_vec()].into_iter().collect());
    }

    #[test]
    fn test_remove_and_extent() {
        let (core, index) = index();
        core.atomically("index", || {
            SecondaryIndex::add(&index, b"a", &feature("a", -3.0, 2.0))?;
            SecondaryIndex::add(&index, b"b", &feature("b", 4.0, 8.0))
        })
        .expect("add should succeed");

        let extent = index.extent().expect("extent").expect("non-empty");
        assert!(extent.min_x < -3.0 && extent.max_y > 8.0);

        core.atomically("index", || SecondaryIndex::remove(&index, b"a", &feature("a", -3.0, 2.0)))
            .expect("remove should succeed");
        assert_eq!(index.len(), 1);
        assert!(index.query(&Bbox::new(-4.0, 0.0, -2.0, 3.0)).expect("query").is_empty());
    }
}
