//! Aegis Scan Planner
//!
//! Picks the one index that drives a store scan and orders the remaining
//! filter components as in-stream predicates, cheapest first.
//!
//! Precedence of the driving index:
//! - entities: internal ids > unique ids > spatial > full text > parent > full scan
//! - channels: internal ids > owners > full text > full scan
//! - records: record keys > streams > sub-entities > all series
//!
//! Plans are made after nested filters have been resolved into id sets,
//! so a join shows up here as owner, stream or sub-entity ids.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::filter::{ChannelFilter, EntityFilter, RecordFilter};
use crate::model::{Channel, TimeSeriesRecord};
use std::fmt;

// =============================================================================
// Plan Types
// =============================================================================

/// Index driving the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryIndex {
    InternalIds,
    UniqueIds,
    Spatial,
    FullText,
    /// Parent, owner or stream directory.
    Owner,
    SubEntity,
    FullScan,
}

/// Predicate applied to the candidate stream, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Residual {
    Owner,
    UniqueIds,
    ChannelNames,
    SubEntity,
    ResultTime,
    ValidTime,
    FullText,
    Spatial,
    /// Needs the decoded payload, so it always runs last.
    ValuePredicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlan {
    pub primary: PrimaryIndex,
    pub residuals: Vec<Residual>,
    pub limit: Option<u64>,
}

impl ScanPlan {
    fn new(primary: PrimaryIndex, mut residuals: Vec<Residual>, limit: Option<u64>) -> Self {
        residuals.sort();
        residuals.dedup();
        Self { primary, residuals, limit }
    }

    pub fn for_entities<V>(filter: &EntityFilter<V>) -> Self {
        let primary = if filter.internal_ids.is_some() {
            PrimaryIndex::InternalIds
        } else if filter.unique_ids.is_some() {
            PrimaryIndex::UniqueIds
        } else if filter.spatial.is_some() {
            PrimaryIndex::Spatial
        } else if filter.full_text.is_some() {
            PrimaryIndex::FullText
        } else if filter.parent_ids.is_some() {
            PrimaryIndex::Owner
        } else {
            PrimaryIndex::FullScan
        };

        let mut residuals = Vec::new();
        if filter.unique_ids.is_some() && primary != PrimaryIndex::UniqueIds {
            residuals.push(Residual::UniqueIds);
        }
        if filter.parent_ids.is_some() && primary != PrimaryIndex::Owner {
            residuals.push(Residual::Owner);
        }
        if filter.spatial.is_some() && primary != PrimaryIndex::Spatial {
            residuals.push(Residual::Spatial);
        }
        if filter.full_text.is_some() && primary != PrimaryIndex::FullText {
            residuals.push(Residual::FullText);
        }
        if filter.valid_time.is_some() {
            residuals.push(Residual::ValidTime);
        }
        if filter.value_predicate.is_some() {
            residuals.push(Residual::ValuePredicate);
        }
        Self::new(primary, residuals, filter.limit)
    }

    pub fn for_channels<V: Channel>(filter: &ChannelFilter<V>) -> Self {
        let primary = if filter.internal_ids.is_some() {
            PrimaryIndex::InternalIds
        } else if filter.owner_ids.is_some() {
            PrimaryIndex::Owner
        } else if filter.full_text.is_some() {
            PrimaryIndex::FullText
        } else {
            PrimaryIndex::FullScan
        };

        let mut residuals = Vec::new();
        if filter.owner_ids.is_some() && primary != PrimaryIndex::Owner {
            residuals.push(Residual::Owner);
        }
        if filter.channel_names.is_some() {
            residuals.push(Residual::ChannelNames);
        }
        if filter.full_text.is_some() && primary != PrimaryIndex::FullText {
            residuals.push(Residual::FullText);
        }
        if filter.valid_time.is_some() {
            residuals.push(Residual::ValidTime);
        }
        if filter.value_predicate.is_some() {
            residuals.push(Residual::ValuePredicate);
        }
        Self::new(primary, residuals, filter.limit)
    }

    pub fn for_records<R: TimeSeriesRecord>(filter: &RecordFilter<R>) -> Self {
        let primary = if filter.internal_ids.is_some() {
            PrimaryIndex::InternalIds
        } else if filter.stream_ids.is_some() {
            PrimaryIndex::Owner
        } else if filter.sub_entity_ids.is_some() {
            PrimaryIndex::SubEntity
        } else {
            PrimaryIndex::FullScan
        };

        let mut residuals = Vec::new();
        if filter.stream_ids.is_some() && primary != PrimaryIndex::Owner {
            residuals.push(Residual::Owner);
        }
        if filter.sub_entity_ids.is_some() && primary != PrimaryIndex::SubEntity {
            residuals.push(Residual::SubEntity);
        }
        if filter.result_time.is_some() {
            residuals.push(Residual::ResultTime);
        }
        if filter.phenomenon_time.is_some() {
            residuals.push(Residual::ValidTime);
        }
        if filter.value_predicate.is_some() {
            residuals.push(Residual::ValuePredicate);
        }
        Self::new(primary, residuals, filter.limit)
    }

    pub fn applies(&self, residual: Residual) -> bool {
        self.residuals.contains(&residual)
    }
}

impl fmt::Display for ScanPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan {:?}", self.primary)?;
        if !self.residuals.is_empty() {
            let names: Vec<String> = self.residuals.iter().map(|r| format!("{:?}", r)).collect();
            write!(f, " filter [{}]", names.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Bbox;
    use crate::model::{DataStreamInfo, Observation};
    use aegis_common::BigId;

    #[test]
    fn test_entity_precedence() {
        let filter: EntityFilter<()> = EntityFilter::new()
            .with_keywords(["buoy"])
            .with_region(Bbox::new(0.0, 0.0, 1.0, 1.0))
            .with_uid_prefix("urn:")
            .with_predicate(|_| true);
        let plan = ScanPlan::for_entities(&filter);
        assert_eq!(plan.primary, PrimaryIndex::UniqueIds);
        assert_eq!(plan.residuals, vec![Residual::FullText, Residual::Spatial, Residual::ValuePredicate]);

        let ids = filter.clone().with_internal_ids([BigId::new(1, 1)]);
        assert_eq!(ScanPlan::for_entities(&ids).primary, PrimaryIndex::InternalIds);
        assert!(ScanPlan::for_entities(&ids).applies(Residual::UniqueIds));
    }

    #[test]
    fn test_record_plan_and_explain() {
        let filter: RecordFilter<Observation> = RecordFilter::new()
            .with_sub_entities([BigId::new(1, 4)])
            .with_streams([BigId::new(1, 2)])
            .with_limit(10);
        let plan = ScanPlan::for_records(&filter);
        assert_eq!(plan.primary, PrimaryIndex::Owner);
        assert_eq!(plan.to_string(), "scan Owner filter [SubEntity] limit 10");
    }

    #[test]
    fn test_channel_full_scan() {
        let filter: ChannelFilter<DataStreamInfo> = ChannelFilter::new().with_channel_names(["temp"]);
        let plan = ScanPlan::for_channels(&filter);
        assert_eq!(plan.primary, PrimaryIndex::FullScan);
        assert_eq!(plan.residuals, vec![Residual::ChannelNames]);
    }
}
