//! Aegis Model - Resource Traits and Default Payloads
//!
//! The stores are generic over their payload types and only see them
//! through the traits below. Default payload structs cover systems,
//! features of interest, datastreams, observations, command streams,
//! commands and command status reports.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::geom::Geometry;
use crate::keys::RecordKey;
use aegis_common::{BigId, TimeExtent, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Resource Traits
// =============================================================================

/// Anything with a name and an optional description; both feed the
/// full-text index.
pub trait Resource: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }
}

/// Entity stored in a versioned entity store.
pub trait VersionedEntity: Resource {
    fn unique_id(&self) -> &str;

    /// Declared validity. `None` means the version is timeless.
    fn valid_time(&self) -> Option<TimeExtent> {
        None
    }

    fn geometry(&self) -> Option<&Geometry> {
        None
    }
}

/// Channel (datastream or command stream) owned by an entity.
///
/// The associated types name the payloads on either side of the channel,
/// so a channel filter can nest a filter on owners or on records.
pub trait Channel: Resource {
    type Owner: VersionedEntity;
    type Record: TimeSeriesRecord<Stream = Self>;

    fn owner_id(&self) -> BigId;

    /// Output or control input name, unique per owner and valid time.
    fn channel_name(&self) -> &str;

    fn valid_time(&self) -> Option<TimeExtent>;

    fn with_valid_time(&self, valid_time: TimeExtent) -> Self;
}

/// Time-stamped record stored in a time-series store.
pub trait TimeSeriesRecord: Clone + Send + Sync + 'static {
    type Stream: Channel;
    /// Payload of the entity `sub_entity_id` refers to.
    type SubEntity: VersionedEntity;

    fn stream_id(&self) -> BigId;

    fn sub_entity_id(&self) -> BigId {
        BigId::NONE
    }

    fn timestamp(&self) -> DateTime<Utc>;

    /// `None` or a value equal to `timestamp()` means continuous sampling.
    fn result_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// End of the period this record describes; `None` for an instant.
    fn coverage_end(&self) -> Option<DateTime<Utc>> {
        None
    }
}

// =============================================================================
// Feature Descriptions
// =============================================================================

/// Default payload for systems, procedures, deployments and features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDesc {
    pub uid: String,
    pub name: String,
    pub description: Option<String>,
    pub feature_type: Option<String>,
    pub valid_time: Option<TimeExtent>,
    pub geometry: Option<Geometry>,
    pub properties: BTreeMap<String, Value>,
}

impl FeatureDesc {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            description: None,
            feature_type: None,
            valid_time: None,
            geometry: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_type(mut self, feature_type: impl Into<String>) -> Self {
        self.feature_type = Some(feature_type.into());
        self
    }

    pub fn with_valid_time(mut self, valid_time: TimeExtent) -> Self {
        self.valid_time = Some(valid_time);
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

impl Resource for FeatureDesc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl VersionedEntity for FeatureDesc {
    fn unique_id(&self) -> &str {
        &self.uid
    }

    fn valid_time(&self) -> Option<TimeExtent> {
        self.valid_time
    }

    fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }
}

// =============================================================================
// Datastreams and Observations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStreamInfo {
    pub system_id: BigId,
    pub output_name: String,
    pub name: String,
    pub description: Option<String>,
    pub valid_time: Option<TimeExtent>,
    /// Names of the components of each observation result.
    pub result_fields: Vec<String>,
}

impl DataStreamInfo {
    pub fn new(system_id: BigId, output_name: impl Into<String>) -> Self {
        let output_name = output_name.into();
        Self {
            system_id,
            name: output_name.clone(),
            output_name,
            description: None,
            valid_time: None,
            result_fields: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_valid_time(mut self, valid_time: TimeExtent) -> Self {
        self.valid_time = Some(valid_time);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.result_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl Resource for DataStreamInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl Channel for DataStreamInfo {
    type Owner = FeatureDesc;
    type Record = Observation;

    fn owner_id(&self) -> BigId {
        self.system_id
    }

    fn channel_name(&self) -> &str {
        &self.output_name
    }

    fn valid_time(&self) -> Option<TimeExtent> {
        self.valid_time
    }

    fn with_valid_time(&self, valid_time: TimeExtent) -> Self {
        Self {
            valid_time: Some(valid_time),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub datastream_id: BigId,
    pub foi_id: BigId,
    pub phenomenon_time: DateTime<Utc>,
    pub result_time: Option<DateTime<Utc>>,
    /// End of the sampling period for time-averaged observations.
    pub phenomenon_end: Option<DateTime<Utc>>,
    pub result: Vec<Value>,
}

impl Observation {
    pub fn new(datastream_id: BigId, phenomenon_time: DateTime<Utc>, result: Vec<Value>) -> Self {
        Self {
            datastream_id,
            foi_id: BigId::NONE,
            phenomenon_time,
            result_time: None,
            phenomenon_end: None,
            result,
        }
    }

    pub fn with_foi(mut self, foi_id: BigId) -> Self {
        self.foi_id = foi_id;
        self
    }

    pub fn with_result_time(mut self, result_time: DateTime<Utc>) -> Self {
        self.result_time = Some(result_time);
        self
    }

    pub fn with_phenomenon_end(mut self, end: DateTime<Utc>) -> Self {
        self.phenomenon_end = Some(end);
        self
    }
}

impl TimeSeriesRecord for Observation {
    type Stream = DataStreamInfo;
    type SubEntity = FeatureDesc;

    fn stream_id(&self) -> BigId {
        self.datastream_id
    }

    fn sub_entity_id(&self) -> BigId {
        self.foi_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.phenomenon_time
    }

    fn result_time(&self) -> Option<DateTime<Utc>> {
        self.result_time
    }

    fn coverage_end(&self) -> Option<DateTime<Utc>> {
        self.phenomenon_end
    }
}

// =============================================================================
// Command Streams, Commands and Status
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStreamInfo {
    pub system_id: BigId,
    pub control_input_name: String,
    pub name: String,
    pub description: Option<String>,
    pub valid_time: Option<TimeExtent>,
    pub parameter_fields: Vec<String>,
}

impl CommandStreamInfo {
    pub fn new(system_id: BigId, control_input_name: impl Into<String>) -> Self {
        let control_input_name = control_input_name.into();
        Self {
            system_id,
            name: control_input_name.clone(),
            control_input_name,
            description: None,
            valid_time: None,
            parameter_fields: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_valid_time(mut self, valid_time: TimeExtent) -> Self {
        self.valid_time = Some(valid_time);
        self
    }
}

impl Resource for CommandStreamInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl Channel for CommandStreamInfo {
    type Owner = FeatureDesc;
    type Record = Command;

    fn owner_id(&self) -> BigId {
        self.system_id
    }

    fn channel_name(&self) -> &str {
        &self.control_input_name
    }

    fn valid_time(&self) -> Option<TimeExtent> {
        self.valid_time
    }

    fn with_valid_time(&self, valid_time: TimeExtent) -> Self {
        Self {
            valid_time: Some(valid_time),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command_stream_id: BigId,
    pub foi_id: BigId,
    pub issue_time: DateTime<Utc>,
    pub sender: Option<String>,
    pub parameters: Vec<Value>,
}

impl Command {
    pub fn new(command_stream_id: BigId, issue_time: DateTime<Utc>, parameters: Vec<Value>) -> Self {
        Self {
            command_stream_id,
            foi_id: BigId::NONE,
            issue_time,
            sender: None,
            parameters,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_foi(mut self, foi_id: BigId) -> Self {
        self.foi_id = foi_id;
        self
    }
}

impl TimeSeriesRecord for Command {
    type Stream = CommandStreamInfo;
    type SubEntity = FeatureDesc;

    fn stream_id(&self) -> BigId {
        self.command_stream_id
    }

    fn sub_entity_id(&self) -> BigId {
        self.foi_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.issue_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatusCode {
    Pending,
    Accepted,
    Rejected,
    Scheduled,
    Executing,
    Completed,
    Failed,
    Canceled,
}

impl CommandStatusCode {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            CommandStatusCode::Rejected
                | CommandStatusCode::Completed
                | CommandStatusCode::Failed
                | CommandStatusCode::Canceled
        )
    }
}

/// Status report about one command, stored in the command stream's
/// status series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub command_stream_id: BigId,
    pub command: RecordKey,
    pub report_time: DateTime<Utc>,
    pub status: CommandStatusCode,
    pub execution_time: Option<TimeExtent>,
    pub message: Option<String>,
}

impl CommandStatus {
    pub fn new(command_stream_id: BigId, command: RecordKey, report_time: DateTime<Utc>, status: CommandStatusCode) -> Self {
        Self {
            command_stream_id,
            command,
            report_time,
            status,
            execution_time: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_execution_time(mut self, execution_time: TimeExtent) -> Self {
        self.execution_time = Some(execution_time);
        self
    }
}

/// Reports about one command form their own series: the sub-entity slot
/// holds the command's series id and the result time its issue time, so
/// status stores are never joined to a feature store.
impl TimeSeriesRecord for CommandStatus {
    type Stream = CommandStreamInfo;
    type SubEntity = FeatureDesc;

    fn stream_id(&self) -> BigId {
        self.command_stream_id
    }

    fn sub_entity_id(&self) -> BigId {
        BigId::new(0, self.command.series_id)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.report_time
    }

    fn result_time(&self) -> Option<DateTime<Utc>> {
        Some(self.command.timestamp)
    }

    fn coverage_end(&self) -> Option<DateTime<Utc>> {
        self.execution_time.and_then(|t| t.end)
    }
}
