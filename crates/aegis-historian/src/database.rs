//! Aegis Historian Database
//!
//! Opens one map engine and every store of a sensor historian on it, and
//! wires the references between them:
//!
//! - systems own datastreams and command streams
//! - datastreams own observations, command streams own commands and
//!   status reports
//! - observations and commands reference features of interest
//!
//! The same links resolve nested filters, e.g. observations selected by a
//! filter on their datastream's owning system.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::channel::{ChannelStore, COMMAND_STREAMS_PREFIX, DATASTREAMS_PREFIX};
use crate::entity::EntityStore;
use crate::filter::{RecordFilter, TemporalFilter};
use crate::keys::{CommandStatusKey, RecordKey};
use crate::model::{Command, CommandStatus, CommandStreamInfo, DataStreamInfo, FeatureDesc, Observation};
use crate::series::{TimeSeriesStore, COMMANDS_PREFIX, OBSERVATIONS_PREFIX, STATUS_PREFIX};
use aegis_common::{AegisError, HistorianConfig, Result};
use aegis_storage::{MapStore, StorageStats};
use std::io::{Read, Write};
use std::sync::Arc;

pub const SYSTEMS_STORE: &str = "sys_store";
pub const PROCEDURES_STORE: &str = "proc_store";
pub const DEPLOYMENTS_STORE: &str = "depl_store";
pub const FEATURES_STORE: &str = "foi_store";
pub const OBSERVATIONS_STORE: &str = "obs_store";
pub const COMMANDS_STORE: &str = "cmd_store";

// =============================================================================
// Store Groups
// =============================================================================

/// Datastreams and their observations.
pub struct ObsStore {
    pub datastreams: Arc<ChannelStore<DataStreamInfo>>,
    pub observations: Arc<TimeSeriesStore<Observation>>,
}

/// Command streams, their commands and the status reports about them.
pub struct CommandStore {
    pub command_streams: Arc<ChannelStore<CommandStreamInfo>>,
    pub commands: Arc<TimeSeriesStore<Command>>,
    pub status: Arc<TimeSeriesStore<CommandStatus>>,
}

impl CommandStore {
    /// Record a status report about an existing command.
    pub fn add_status(&self, status: CommandStatus) -> Result<CommandStatusKey> {
        let Some(command) = self.commands.get(&status.command)? else {
            return Err(AegisError::UnknownReference(format!(
                "status report for unknown command {}",
                status.command
            )));
        };
        if command.command_stream_id != status.command_stream_id {
            return Err(AegisError::InvalidArgument(format!(
                "command {} belongs to stream {}, not {}",
                status.command, command.command_stream_id, status.command_stream_id
            )));
        }
        let report_time = status.report_time;
        let command_key = status.command;
        self.status.add(status)?;
        Ok(CommandStatusKey::new(command_key, report_time))
    }

    /// Status reports about `command`, oldest first.
    pub fn status_of(&self, command: &RecordKey) -> Result<Vec<(CommandStatusKey, CommandStatus)>> {
        let Some(found) = self.commands.get(command)? else {
            return Ok(Vec::new());
        };
        let target = *command;
        let filter = RecordFilter::new()
            .with_streams([found.command_stream_id])
            .with_result_time(TemporalFilter::at(command.timestamp))
            .with_predicate(move |status: &CommandStatus| status.command == target);

        self.status
            .select(&filter)
            .map_ok(|entry| (CommandStatusKey::new(entry.value.command, entry.key.timestamp), entry.value))
            .try_collect()
    }

    /// Most recent status report about `command`.
    pub fn current_status(&self, command: &RecordKey) -> Result<Option<CommandStatus>> {
        Ok(self.status_of(command)?.pop().map(|(_, status)| status))
    }
}

// =============================================================================
// Historian Database
// =============================================================================

pub struct HistorianDatabase {
    config: HistorianConfig,
    engine: Arc<MapStore>,
    pub sys_store: Arc<EntityStore<FeatureDesc>>,
    pub proc_store: Arc<EntityStore<FeatureDesc>>,
    pub depl_store: Arc<EntityStore<FeatureDesc>>,
    pub foi_store: Arc<EntityStore<FeatureDesc>>,
    pub obs_store: ObsStore,
    pub cmd_store: CommandStore,
}

impl HistorianDatabase {
    /// Open the database described by `config`.
    pub fn open(config: HistorianConfig) -> Result<Self> {
        config.validate()?;
        let engine = MapStore::open(&config.storage)?;

        let sys_store = Arc::new(EntityStore::open(&engine, SYSTEMS_STORE, &config)?);
        let proc_store = Arc::new(EntityStore::open(&engine, PROCEDURES_STORE, &config)?);
        let depl_store = Arc::new(EntityStore::open(&engine, DEPLOYMENTS_STORE, &config)?);
        let foi_store = Arc::new(EntityStore::open(&engine, FEATURES_STORE, &config)?);

        let obs_store = ObsStore {
            datastreams: Arc::new(ChannelStore::open(&engine, OBSERVATIONS_STORE, DATASTREAMS_PREFIX, &config)?),
            observations: Arc::new(TimeSeriesStore::open(&engine, OBSERVATIONS_STORE, OBSERVATIONS_PREFIX, &config)?),
        };
        let cmd_store = CommandStore {
            command_streams: Arc::new(ChannelStore::open(&engine, COMMANDS_STORE, COMMAND_STREAMS_PREFIX, &config)?),
            commands: Arc::new(TimeSeriesStore::open(&engine, COMMANDS_STORE, COMMANDS_PREFIX, &config)?),
            status: Arc::new(TimeSeriesStore::open(&engine, COMMANDS_STORE, STATUS_PREFIX, &config)?),
        };

        let db = Self {
            config,
            engine,
            sys_store,
            proc_store,
            depl_store,
            foi_store,
            obs_store,
            cmd_store,
        };
        db.link_stores();

        tracing::info!(
            "Opened historian database ({}, {} systems, {} observations)",
            db.config
                .storage
                .path
                .as_ref()
                .map_or_else(|| "in memory".to_string(), |p| p.display().to_string()),
            db.sys_store.num_entities(),
            db.obs_store.observations.len()
        );
        Ok(db)
    }

    /// Volatile database with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::open(HistorianConfig::default())
    }

    fn link_stores(&self) {
        let obs = &self.obs_store;
        obs.datastreams.link_to(self.sys_store.clone());
        obs.datastreams.add_record_store(obs.observations.clone());
        obs.datastreams.link_record_query(obs.observations.clone());
        obs.observations.link_to(obs.datastreams.clone());
        obs.observations.link_sub_entities(self.foi_store.clone());
        self.sys_store.add_dependent(obs.datastreams.clone());

        let cmd = &self.cmd_store;
        cmd.command_streams.link_to(self.sys_store.clone());
        cmd.command_streams.add_record_store(cmd.commands.clone());
        cmd.command_streams.add_record_store(cmd.status.clone());
        cmd.command_streams.link_record_query(cmd.commands.clone());
        cmd.commands.link_to(cmd.command_streams.clone());
        cmd.commands.link_sub_entities(self.foi_store.clone());
        cmd.status.link_to(cmd.command_streams.clone());
        self.sys_store.add_dependent(cmd.command_streams.clone());
    }

    pub fn config(&self) -> &HistorianConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<MapStore> {
        &self.engine
    }

    pub fn is_read_only(&self) -> bool {
        self.engine.is_read_only()
    }

    pub fn stats(&self) -> StorageStats {
        self.engine.stats()
    }

    pub fn commit(&self) -> Result<()> {
        self.engine.commit()
    }

    pub fn backup(&self, writer: &mut dyn Write) -> Result<u64> {
        self.engine.backup(writer)
    }

    pub fn restore(&self, reader: &mut dyn Read) -> Result<()> {
        self.engine.restore(reader)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ChannelFilter;
    use crate::model::CommandStatusCode;
    use aegis_common::{BigId, Value};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_observation_requires_known_datastream() {
        let db = HistorianDatabase::in_memory().expect("open should succeed");
        let sys = db.sys_store.add(FeatureDesc::new("urn:sys", "Station")).unwrap().internal_id;
        let ds = db.obs_store.datastreams.add(DataStreamInfo::new(sys, "temp")).unwrap();

        let t = Utc.timestamp_opt(1_000, 0).unwrap();
        db.obs_store
            .observations
            .add(Observation::new(ds, t, vec![Value::Float(20.5)]))
            .expect("add should succeed");
        let err = db
            .obs_store
            .observations
            .add(Observation::new(BigId::new(1, 77), t, vec![]))
            .expect_err("unknown datastream");
        assert!(matches!(err, AegisError::UnknownReference(_)));

        let err = db
            .obs_store
            .observations
            .add(Observation::new(ds, t, vec![]).with_foi(BigId::new(1, 5)))
            .expect_err("unknown feature of interest");
        assert!(matches!(err, AegisError::UnknownReference(_)));
        assert_eq!(db.obs_store.observations.len(), 1);
    }

    #[test]
    fn test_command_status_lookup() {
        let db = HistorianDatabase::in_memory().expect("open should succeed");
        let sys = db.sys_store.add(FeatureDesc::new("urn:sys", "Pump")).unwrap().internal_id;
        let cs = db.cmd_store.command_streams.add(CommandStreamInfo::new(sys, "speed")).unwrap();

        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        let first = db.cmd_store.commands.add(Command::new(cs, t(100), vec![Value::Integer(10)])).unwrap();
        let second = db.cmd_store.commands.add(Command::new(cs, t(200), vec![Value::Integer(20)])).unwrap();

        for (command, report, code) in [
            (first, 100, CommandStatusCode::Accepted),
            (first, 150, CommandStatusCode::Completed),
            (second, 210, CommandStatusCode::Rejected),
        ] {
            db.cmd_store
                .add_status(CommandStatus::new(cs, command, t(report), code))
                .expect("add_status should succeed");
        }

        let reports = db.cmd_store.status_of(&first).expect("status_of should succeed");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0.report_time, t(100));
        assert_eq!(
            db.cmd_store.current_status(&first).unwrap().map(|s| s.status),
            Some(CommandStatusCode::Completed)
        );

        let err = db
            .cmd_store
            .add_status(CommandStatus::new(cs, RecordKey::new(99, t(1)), t(2), CommandStatusCode::Pending))
            .expect_err("unknown command");
        assert!(matches!(err, AegisError::UnknownReference(_)));

        db.sys_store.remove_entity(sys).expect("remove should succeed");
        assert!(db.cmd_store.commands.is_empty());
        assert!(db.cmd_store.status.is_empty());
        assert_eq!(db.cmd_store.command_streams.count(&ChannelFilter::new()).unwrap(), 0);
    }

    #[test]
    fn test_nested_filters_join_linked_stores() {
        use crate::filter::EntityFilter;

        let db = HistorianDatabase::in_memory().expect("open should succeed");
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        let buoy = db.sys_store.add(FeatureDesc::new("urn:sys:buoy", "Buoy")).unwrap().internal_id;
        let mast = db.sys_store.add(FeatureDesc::new("urn:sys:mast", "Mast")).unwrap().internal_id;
        let bay = db.foi_store.add(FeatureDesc::new("urn:foi:bay", "North bay")).unwrap().internal_id;

        let water = db.obs_store.datastreams.add(DataStreamInfo::new(buoy, "water_temp")).unwrap();
        let wind = db.obs_store.datastreams.add(DataStreamInfo::new(mast, "wind")).unwrap();
        let idle = db.obs_store.datastreams.add(DataStreamInfo::new(mast, "gust")).unwrap();
        db.obs_store.observations.add(Observation::new(water, t(10), vec![]).with_foi(bay)).unwrap();
        db.obs_store.observations.add(Observation::new(water, t(20), vec![])).unwrap();
        db.obs_store.observations.add(Observation::new(wind, t(30), vec![])).unwrap();

        let on_buoy: RecordFilter<Observation> = RecordFilter::new().with_stream_filter(
            ChannelFilter::new().with_owner_filter(EntityFilter::new().with_unique_ids(["urn:sys:buoy"])),
        );
        let found: Vec<_> = db.obs_store.observations.select(&on_buoy).try_collect().unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|entry| entry.value.datastream_id == water));
        assert_eq!(db.obs_store.observations.count(&on_buoy).unwrap(), 2);

        let in_bay: RecordFilter<Observation> = RecordFilter::new().with_sub_entity_filter(EntityFilter::new().with_keywords(["bay"]));
        let found: Vec<_> = db.obs_store.observations.select(&in_bay).try_collect().unwrap();
        assert_eq!(found.iter().map(|entry| entry.key.timestamp).collect::<Vec<_>>(), vec![t(10)]);

        let with_data: ChannelFilter<DataStreamInfo> = ChannelFilter::new().with_record_filter(RecordFilter::new().with_time_range(t(25), t(40)));
        let ids: Vec<BigId> = db.obs_store.datastreams.select_keys(&with_data).try_collect().unwrap();
        assert_eq!(ids, vec![wind]);

        let on_mast = ChannelFilter::new()
            .with_owner_filter(EntityFilter::new().with_unique_ids(["urn:sys:mast"]))
            .with_channel_names(["gust"]);
        let ids: Vec<BigId> = db.obs_store.datastreams.select_keys(&on_mast).try_collect().unwrap();
        assert_eq!(ids, vec![idle]);

        let nobody: RecordFilter<Observation> = RecordFilter::new()
            .with_streams([wind])
            .with_stream_filter(ChannelFilter::new().with_owners([buoy]));
        assert_eq!(db.obs_store.observations.count(&nobody).unwrap(), 0);

        let by_feature: RecordFilter<CommandStatus> = RecordFilter::new().with_sub_entity_filter(EntityFilter::new().with_keywords(["bay"]));
        let err = db.cmd_store.status.count(&by_feature).expect_err("status store has no feature link");
        assert!(matches!(err, AegisError::Unsupported(_)));
    }
}
