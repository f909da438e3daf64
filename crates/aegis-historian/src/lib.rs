//! Aegis Historian - Sensor Data Persistence Core
//!
//! Versioned entity, channel and time-series stores for a sensor-data
//! historian, built on the Aegis ordered map engine. Every logical index is
//! one named sorted map; every public mutation is atomic across the
//! primary map and its secondary indexes.
//!
//! Key Features:
//! - Valid-time versioning with lazily clipped validity intervals
//! - Order-preserving composite keys per store family
//! - Spatial and full-text secondary indexes
//! - Single-index scan planning with in-stream residual predicates
//! - Time-ordered k-way merge of per-series record streams
//! - Rank-based record counts and histograms
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod channel;
pub mod database;
pub mod entity;
pub mod filter;
pub mod geom;
pub mod ids;
pub mod index;
pub mod keys;
pub mod link;
pub mod merge;
pub mod model;
pub mod planner;
pub mod series;
pub mod stats;
pub mod store;

pub use channel::{ChannelEntry, ChannelStore};
pub use database::{CommandStore, HistorianDatabase, ObsStore};
pub use entity::{effective_valid_time, EntityStore, VersionedEntry};
pub use filter::{ChannelFilter, EntityFilter, RecordFilter, TemporalFilter, UidFilter};
pub use geom::{Bbox, Coord, Geometry};
pub use ids::{IdProvider, SequentialIds, UidHashIds};
pub use index::{FullTextIndex, SecondaryIndex, SpatialIndex, TextAnalyzer};
pub use keys::{CommandStatusKey, FeatureKey, RecordKey};
pub use link::{EntityLookup, IdResolver, OwnerCascade, StreamRecords};
pub use merge::{MergeSortIter, QueryStream, RoundRobinIter};
pub use model::{
    Channel, Command, CommandStatus, CommandStatusCode, CommandStreamInfo, DataStreamInfo, FeatureDesc,
    Observation, Resource, TimeSeriesRecord, VersionedEntity,
};
pub use planner::{PrimaryIndex, ScanPlan};
pub use series::{RecordEntry, TimeSeriesStore};
pub use stats::{Histogram, SeriesStats};
pub use store::{StoreCore, StoreKind};
