//! Aegis Ids - Identifier Providers
//!
//! Allocation of local ids for new entities and channels. The sequential
//! provider hands out the last used id + 1; the uid-hash provider derives
//! a 48-bit id from the unique name and valid start so the same resource
//! gets the same id in every database it is loaded into.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use aegis_common::utils::hash_fields;
use aegis_common::{AegisError, IdProviderType, Result, MAX_LOCAL_ID};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const UID_HASH_MASK: u64 = 0xFFFF_FFFF_FFFF;
const MAX_PROBES: usize = 1024;

// =============================================================================
// Id Provider Trait
// =============================================================================

/// Strategy for allocating local ids.
pub trait IdProvider: Send + Sync {
    /// Allocate an id for a new resource named `uid`.
    ///
    /// `last_id` is the largest id currently in use; `is_taken` reports
    /// whether a candidate already exists.
    fn new_id(
        &self,
        uid: &str,
        valid_start: &DateTime<Utc>,
        last_id: Option<u64>,
        is_taken: &dyn Fn(u64) -> bool,
    ) -> Result<u64>;
}

pub fn provider_for(kind: IdProviderType) -> Arc<dyn IdProvider> {
    match kind {
        IdProviderType::Sequential => Arc::new(SequentialIds),
        IdProviderType::UidHash => Arc::new(UidHashIds),
    }
}

// =============================================================================
// Sequential Ids
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialIds;

impl IdProvider for SequentialIds {
    fn new_id(
        &self,
        _uid: &str,
        _valid_start: &DateTime<Utc>,
        last_id: Option<u64>,
        _is_taken: &dyn Fn(u64) -> bool,
    ) -> Result<u64> {
        let next = last_id.unwrap_or(0) + 1;
        if next > MAX_LOCAL_ID {
            return Err(AegisError::Storage("local id space exhausted".to_string()));
        }
        Ok(next)
    }
}

// =============================================================================
// Uid Hash Ids
// =============================================================================

/// Ids derived from the unique name and valid start, probing linearly on
/// the rare collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct UidHashIds;

impl UidHashIds {
    pub fn hash_id(uid: &str, valid_start: &DateTime<Utc>) -> u64 {
        let millis = valid_start.timestamp_millis().to_be_bytes();
        match hash_fields(&[uid.as_bytes(), &millis]) & UID_HASH_MASK {
            0 => 1,
            id => id,
        }
    }
}

impl IdProvider for UidHashIds {
    fn new_id(
        &self,
        uid: &str,
        valid_start: &DateTime<Utc>,
        _last_id: Option<u64>,
        is_taken: &dyn Fn(u64) -> bool,
    ) -> Result<u64> {
        let mut candidate = Self::hash_id(uid, valid_start);
        for _ in 0..MAX_PROBES {
            if !is_taken(candidate) {
                return Ok(candidate);
            }
            candidate = match (candidate + 1) & UID_HASH_MASK {
                0 => 1,
                id => id,
            };
        }
        Err(AegisError::Storage(format!("no free id near hash of {}", uid)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::TIMELESS;

    #[test]
    fn test_sequential() {
        let ids = SequentialIds;
        assert_eq!(ids.new_id("a", &TIMELESS, None, &|_| false).unwrap(), 1);
        assert_eq!(ids.new_id("b", &TIMELESS, Some(41), &|_| false).unwrap(), 42);
        assert!(ids.new_id("c", &TIMELESS, Some(MAX_LOCAL_ID), &|_| false).is_err());
    }

    #[test]
    fn test_uid_hash_is_stable_and_48_bits() {
        let a = UidHashIds.new_id("urn:sensor:1", &TIMELESS, None, &|_| false).unwrap();
        let b = UidHashIds.new_id("urn:sensor:1", &TIMELESS, Some(99), &|_| false).unwrap();
        assert_eq!(a, b);
        assert!(a <= UID_HASH_MASK && a > 0);
        assert_ne!(a, UidHashIds.new_id("urn:sensor:2", &TIMELESS, None, &|_| false).unwrap());
    }

    #[test]
    fn test_uid_hash_steps_past_collision() {
        let first = UidHashIds::hash_id("urn:x", &TIMELESS);
        let id = UidHashIds
            .new_id("urn:x", &TIMELESS, None, &|candidate| candidate == first)
            .unwrap();
        assert_ne!(id, first);
    }
}
