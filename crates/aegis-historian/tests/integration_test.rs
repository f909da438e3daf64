//! End-to-end integration tests for Aegis Historian
//!
//! Exercises the stores through the database facade: key ordering, atomic
//! multi-index writes, version resolution, series collapsing, merged
//! reads, histograms, removal cascades and persistence.

use aegis_common::{AegisError, BigId, HistorianConfig, Result, TimeExtent, TimeRange, Value};
use aegis_historian::keys::{ChannelKey, EntityKey, SeriesKey};
use aegis_historian::merge::BoxedIter;
use aegis_historian::{
    ChannelFilter, Command, CommandStreamInfo, DataStreamInfo, EntityFilter, FeatureDesc, Geometry,
    HistorianDatabase, MergeSortIter, Observation, OwnerCascade, RecordFilter, RecordKey, SecondaryIndex,
    TemporalFilter,
};
use aegis_storage::MapKey;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Database with one system and one datastream.
fn station() -> (HistorianDatabase, BigId, BigId) {
    init_tracing();
    let db = HistorianDatabase::in_memory().expect("open should succeed");
    let sys = db
        .sys_store
        .add(FeatureDesc::new("urn:sys:station", "Weather station"))
        .expect("add should succeed")
        .internal_id;
    let ds = db
        .obs_store
        .datastreams
        .add(DataStreamInfo::new(sys, "temp").with_name("Air temperature"))
        .expect("add should succeed");
    (db, sys, ds)
}

fn temperature(ds: BigId, t: i64) -> Observation {
    Observation::new(ds, ts(t), vec![Value::Float(t as f64 / 10.0)])
}

// =============================================================================
// Key Ordering
// =============================================================================

fn assert_byte_order_matches<K: MapKey + Ord + Clone + std::fmt::Debug>(mut keys: Vec<K>) {
    keys.sort();
    for pair in keys.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (ea, eb) = (a.to_key_bytes(), b.to_key_bytes());
        if a < b {
            assert!(ea < eb, "{:?} < {:?} but encodings disagree", a, b);
        } else {
            assert_eq!(ea, eb);
        }
        assert_eq!(&K::from_key_bytes(&ea).expect("decode"), a);
    }
}

#[test]
fn test_key_ordering_matches_encoding() {
    let times = [-62_135_596_800, -1, 0, 1, 59, 1_700_000_000];
    let ids = [0u64, 1, 127, 128, 300, 1 << 32, u64::MAX];
    let names = ["", "a", "a\u{0}", "ab", "b", "temp", "ä"];

    let mut entity_keys = Vec::new();
    let mut channel_keys = Vec::new();
    let mut series_keys = Vec::new();
    let mut record_keys = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        for t in times {
            let time = ts(t);
            entity_keys.push(EntityKey::new(ids[(i + 3) % ids.len()], *id, time));
            series_keys.push(SeriesKey::new(*id, ids[(i + 1) % ids.len()], time));
            record_keys.push(RecordKey::new(*id, time));
            for name in names {
                channel_keys.push(ChannelKey::new(ids[(i + 2) % ids.len()], name, time, *id));
            }
        }
    }

    assert_byte_order_matches(entity_keys);
    assert_byte_order_matches(channel_keys);
    assert_byte_order_matches(series_keys);
    assert_byte_order_matches(record_keys);
}

// =============================================================================
// Atomic Multi-Index Writes
// =============================================================================

struct FailingIndex {
    armed: AtomicBool,
}

impl SecondaryIndex<FeatureDesc> for FailingIndex {
    fn name(&self) -> &str {
        "failing"
    }

    fn add(&self, _primary_key: &[u8], _value: &FeatureDesc) -> Result<()> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(AegisError::Internal("injected index failure".to_string()));
        }
        Ok(())
    }

    fn remove(&self, _primary_key: &[u8], _value: &FeatureDesc) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_failed_index_write_leaves_store_unchanged() {
    init_tracing();
    let db = HistorianDatabase::in_memory().expect("open should succeed");
    let failing = Arc::new(FailingIndex {
        armed: AtomicBool::new(false),
    });
    db.foi_store.add_index(failing.clone());

    let lake = FeatureDesc::new("urn:foi:lake", "Crater lake").with_geometry(Geometry::point(-122.1, 42.9));
    let key = db.foi_store.add(lake).expect("add should succeed");

    failing.armed.store(true, Ordering::SeqCst);
    let err = db
        .foi_store
        .add(FeatureDesc::new("urn:foi:bay", "Monterey bay").with_geometry(Geometry::point(-121.9, 36.8)))
        .expect_err("index failure");
    assert!(matches!(err, AegisError::Internal(_)));
    assert_eq!(db.foi_store.len(), 1);
    assert!(!db.foi_store.contains_uid("urn:foi:bay"));
    assert_eq!(db.foi_store.count(&EntityFilter::new().with_keywords(["bay"])).unwrap(), 0);

    let err = db
        .foi_store
        .put(&key, FeatureDesc::new("urn:foi:lake", "Renamed lake"))
        .expect_err("index failure");
    assert!(matches!(err, AegisError::Internal(_)));
    let stored = db.foi_store.get(&key).unwrap().expect("original version");
    assert_eq!(stored.name, "Crater lake");
    assert!(stored.geometry.is_some());
    assert_eq!(db.foi_store.count(&EntityFilter::new().with_keywords(["crater"])).unwrap(), 1);
    assert_eq!(db.foi_store.count(&EntityFilter::new().with_keywords(["renamed"])).unwrap(), 0);

    failing.armed.store(false, Ordering::SeqCst);
    db.foi_store
        .add(FeatureDesc::new("urn:foi:bay", "Monterey bay"))
        .expect("add should succeed");
    assert_eq!(db.foi_store.num_entities(), 2);
}

// =============================================================================
// Current Version Resolution
// =============================================================================

#[test]
fn test_current_version_is_clipped_by_next_version() {
    init_tracing();
    let db = HistorianDatabase::in_memory().expect("open should succeed");
    let now = Utc::now();
    let t1 = now - Duration::days(2);
    let t2 = now + Duration::days(1);
    let t3 = now + Duration::days(2);

    let v1 = db
        .sys_store
        .add(FeatureDesc::new("urn:sys:buoy", "Buoy v1").with_valid_time(TimeExtent::open(t1)))
        .expect("add should succeed");
    let current = db.sys_store.get_current(v1.internal_id).unwrap().expect("current");
    assert_eq!(current.key, v1);
    assert!(current.valid_time.is_open_ended());

    db.sys_store
        .add_version(FeatureDesc::new("urn:sys:buoy", "Buoy v2").with_valid_time(TimeExtent::open(t2)))
        .expect("add_version should succeed");
    let current = db.sys_store.get_current_by_uid("urn:sys:buoy").unwrap().expect("current");
    assert_eq!(current.value.name, "Buoy v1");
    assert_eq!(current.valid_time.end, Some(t2));

    db.sys_store
        .add_version(FeatureDesc::new("urn:sys:buoy", "Buoy v3").with_valid_time(TimeExtent::open(t3)))
        .expect("add_version should succeed");
    let middle = db
        .sys_store
        .get_at(v1.internal_id, t2 + Duration::hours(1))
        .unwrap()
        .expect("version at t2");
    assert_eq!(middle.value.name, "Buoy v2");
    assert_eq!(middle.valid_time.end, Some(t3));

    let latest = db.sys_store.get_latest(v1.internal_id).unwrap().expect("latest");
    assert_eq!(latest.value.name, "Buoy v3");
    assert!(latest.valid_time.is_open_ended());

    let err = db
        .sys_store
        .add_version(FeatureDesc::new("urn:sys:buoy", "Buoy v0").with_valid_time(TimeExtent::open(now)))
        .expect_err("version older than the latest");
    assert!(matches!(err, AegisError::InvalidArgument(_)));

    let versions = db
        .sys_store
        .select(&EntityFilter::new().with_internal_ids([v1.internal_id]))
        .try_collect()
        .unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].valid_time.end, Some(versions[1].key.valid_start));
    assert_eq!(versions[1].valid_time.end, Some(versions[2].key.valid_start));
}

// =============================================================================
// Series Collapsing
// =============================================================================

#[test]
fn test_series_collapsing() {
    let (db, _, ds) = station();
    let observations = &db.obs_store.observations;

    for t in 0..10 {
        let obs = temperature(ds, t * 60).with_result_time(ts(t * 60));
        observations.add(obs).expect("add should succeed");
    }
    assert_eq!(observations.num_series(), 1);
    assert_eq!(observations.len(), 10);

    for run in 0..3 {
        for t in 0..4 {
            let forecast = temperature(ds, 10_000 + t * 3600).with_result_time(ts(9_000 + run));
            observations.add(forecast).expect("add should succeed");
        }
    }
    assert_eq!(observations.num_series(), 4);
    assert_eq!(observations.len(), 22);

    let latest_run = RecordFilter::new()
        .with_streams([ds])
        .with_result_time(TemporalFilter::at(ts(9_002)));
    let forecasts: Vec<_> = observations
        .select(&latest_run)
        .try_collect()
        .unwrap()
        .into_iter()
        .filter(|entry| entry.value.result_time.is_some_and(|rt| rt != entry.value.phenomenon_time))
        .collect();
    assert_eq!(forecasts.len(), 4);
}

// =============================================================================
// Merged Reads
// =============================================================================

#[test]
fn test_merge_sort_matches_sorted_union() {
    let inputs: Vec<Vec<(i64, usize)>> = (0..5usize)
        .map(|stream| (0..40).map(|i| ((i * (stream as i64 + 2)) % 97, stream)).collect())
        .map(|mut items: Vec<(i64, usize)>| {
            items.sort();
            items
        })
        .collect();

    let mut expected: Vec<(i64, usize)> = inputs.iter().flatten().copied().collect();
    expected.sort_by_key(|item| item.0);

    let streams: Vec<BoxedIter<'static, (i64, usize)>> = inputs
        .into_iter()
        .map(|items| Box::new(items.into_iter().map(Ok)) as BoxedIter<'static, (i64, usize)>)
        .collect();
    let merged: Vec<(i64, usize)> = MergeSortIter::new(streams, |item: &(i64, usize)| item.0)
        .collect::<Result<_>>()
        .expect("merge should succeed");

    let keys: Vec<i64> = merged.iter().map(|item| item.0).collect();
    let expected_keys: Vec<i64> = expected.iter().map(|item| item.0).collect();
    assert_eq!(keys, expected_keys);
    for pair in merged.windows(2) {
        if pair[0].0 == pair[1].0 {
            assert!(pair[0].1 <= pair[1].1, "ties must keep stream order");
        }
    }
}

#[test]
fn test_observations_across_streams_are_time_ordered() {
    let (db, sys, ds) = station();
    let wind = db
        .obs_store
        .datastreams
        .add(DataStreamInfo::new(sys, "wind"))
        .expect("add should succeed");
    for t in [50, 10, 30] {
        db.obs_store.observations.add(temperature(ds, t)).unwrap();
    }
    for t in [20, 40, 60, 10] {
        db.obs_store.observations.add(temperature(wind, t)).unwrap();
    }

    let stream = db
        .obs_store
        .observations
        .select(&RecordFilter::new().with_streams([ds, wind]).with_time_range(ts(15), ts(55)));
    assert!(stream.is_time_ordered());
    let times: Vec<i64> = stream.map(|e| e.unwrap().key.timestamp.timestamp()).collect();
    assert_eq!(times, vec![20, 30, 40, 50]);
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_histogram_matches_brute_force() {
    let (db, _, ds) = station();
    let times = [0, 5, 10, 20, 21, 39, 40, 55, 60];
    for t in times {
        db.obs_store.observations.add(temperature(ds, t)).unwrap();
    }

    for (start, end, bin) in [(0, 60, 10), (3, 57, 7), (0, 59, 20)] {
        let filter = RecordFilter::new().with_streams([ds]).with_time_range(ts(start), ts(end));
        let stats = db
            .obs_store
            .observations
            .statistics(&filter, Some(Duration::seconds(bin)))
            .expect("statistics should succeed");
        assert_eq!(stats.len(), 1);
        let histogram = stats[0].histogram.clone().expect("histogram");

        let bins = ((end - start) / bin + 1) as usize;
        let mut expected = vec![0u64; bins];
        for entry in db.obs_store.observations.select(&RecordFilter::new().with_streams([ds])) {
            let t = entry.unwrap().key.timestamp.timestamp();
            if t >= start && t <= end {
                let index = (((t - start) / bin) as usize).min(bins - 1);
                expected[index] += 1;
            }
        }
        assert_eq!(histogram.counts, expected, "range {}..{} bin {}", start, end, bin);
        assert_eq!(stats[0].total_count, expected.iter().sum::<u64>());
    }
}

#[test]
fn test_histogram_of_latest_record() {
    let (db, _, ds) = station();
    for t in [0, 40, 80] {
        db.obs_store.observations.add(temperature(ds, t)).unwrap();
    }
    let filter = RecordFilter::new()
        .with_streams([ds])
        .with_phenomenon_time(TemporalFilter::Latest);
    let stats = db
        .obs_store
        .observations
        .statistics(&filter, Some(Duration::seconds(1)))
        .expect("statistics should succeed");
    assert_eq!(stats[0].total_count, 1);
    let histogram = stats[0].histogram.clone().expect("histogram");
    assert_eq!((histogram.start, histogram.counts), (ts(80), vec![1]));
    assert_eq!(stats[0].phenomenon_time, TimeRange::new(ts(0), ts(80)));
}

// =============================================================================
// Removal Cascades
// =============================================================================

#[test]
fn test_removing_system_cascades_to_records() {
    let (db, sys, ds) = station();
    let foi = db
        .foi_store
        .add(FeatureDesc::new("urn:foi:roof", "Roof"))
        .expect("add should succeed")
        .internal_id;
    for t in 0..20 {
        db.obs_store
            .observations
            .add(temperature(ds, t).with_foi(foi))
            .expect("add should succeed");
    }
    for t in 0..5 {
        db.obs_store
            .observations
            .add(temperature(ds, 100).with_result_time(ts(t)))
            .expect("add should succeed");
    }
    assert_eq!(db.obs_store.observations.num_series(), 6);
    let by_text = ChannelFilter::new().with_keywords(["temperature"]);
    assert_eq!(db.obs_store.datastreams.count(&by_text).unwrap(), 1);

    db.sys_store.remove_entity(sys).expect("remove should succeed");

    let by_stream = RecordFilter::new().with_streams([ds]);
    assert_eq!(db.obs_store.observations.count(&by_stream).unwrap(), 0);
    assert_eq!(
        db.obs_store
            .observations
            .count(&RecordFilter::new().with_sub_entities([foi]))
            .unwrap(),
        0
    );
    assert!(db.obs_store.observations.is_empty());
    assert_eq!(db.obs_store.observations.num_series(), 0);
    assert_eq!(db.obs_store.datastreams.count(&by_text).unwrap(), 0);
    assert!(db.sys_store.get_current_by_uid("urn:sys:station").unwrap().is_none());
    assert!(db.foi_store.contains_uid("urn:foi:roof"));
}

struct RefusingDependent;

impl OwnerCascade for RefusingDependent {
    fn remove_by_owner(&self, owner_id: u64) -> Result<u64> {
        Err(AegisError::Internal(format!("owner {} still referenced", owner_id)))
    }
}

#[test]
fn test_failed_cascade_keeps_every_store_intact() {
    let (db, sys, ds) = station();
    let cs = db
        .cmd_store
        .command_streams
        .add(CommandStreamInfo::new(sys, "heater"))
        .expect("add should succeed");
    for t in 0..10 {
        db.obs_store.observations.add(temperature(ds, t)).unwrap();
    }
    db.cmd_store
        .commands
        .add(Command::new(cs, ts(5), vec![Value::Boolean(true)]))
        .unwrap();
    db.sys_store.add_dependent(Arc::new(RefusingDependent));

    let err = db.sys_store.remove_entity(sys).expect_err("last dependent refuses");
    assert!(matches!(err, AegisError::Internal(_)));

    assert!(db.sys_store.get_current_by_uid("urn:sys:station").unwrap().is_some());
    assert!(db.obs_store.datastreams.contains(ds));
    assert!(db.cmd_store.command_streams.contains(cs));
    assert_eq!(db.obs_store.observations.len(), 10);
    assert_eq!(db.obs_store.observations.count(&RecordFilter::new().with_streams([ds])).unwrap(), 10);
    assert_eq!(db.cmd_store.commands.len(), 1);
    let by_text = ChannelFilter::new().with_keywords(["temperature"]);
    assert_eq!(db.obs_store.datastreams.count(&by_text).unwrap(), 1);
}

#[test]
fn test_remove_entries_by_filter() {
    let (db, _, _) = station();
    for i in 0..6 {
        db.foi_store
            .add(FeatureDesc::new(format!("urn:foi:{}", i), format!("Site {}", i)))
            .unwrap();
    }
    let removed = db
        .foi_store
        .remove_entries(&EntityFilter::new().with_uid_prefix("urn:foi:").with_predicate(|f: &FeatureDesc| {
            f.uid.ends_with('1') || f.uid.ends_with('4')
        }))
        .expect("remove should succeed");
    assert_eq!(removed, 2);
    assert_eq!(db.foi_store.num_entities(), 4);
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_commit_and_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("historian.aegis");

    let (sys, ds) = {
        let db = HistorianDatabase::open(HistorianConfig::with_path(&path)).expect("open should succeed");
        let sys = db.sys_store.add(FeatureDesc::new("urn:sys:1", "Station")).unwrap().internal_id;
        let ds = db.obs_store.datastreams.add(DataStreamInfo::new(sys, "temp")).unwrap();
        for t in 0..3 {
            db.obs_store.observations.add(temperature(ds, t)).unwrap();
        }
        db.commit().expect("commit should succeed");
        (sys, ds)
    };

    let db = HistorianDatabase::open(HistorianConfig::with_path(&path)).expect("reopen should succeed");
    assert_eq!(db.sys_store.get_current(sys).unwrap().expect("system").value.name, "Station");
    assert_eq!(db.obs_store.observations.count(&RecordFilter::new().with_streams([ds])).unwrap(), 3);
    let next = db.sys_store.add(FeatureDesc::new("urn:sys:2", "Mast")).unwrap();
    assert_eq!(next.internal_id, BigId::new(1, sys.id + 1));
    db.obs_store.observations.add(temperature(ds, 3)).unwrap();
    assert_eq!(db.obs_store.observations.num_series(), 1);
    db.commit().expect("commit should succeed");
    drop(db);

    let mut config = HistorianConfig::with_path(&path);
    config.storage.read_only = true;
    let ro = HistorianDatabase::open(config).expect("read-only open should succeed");
    assert!(ro.is_read_only());
    assert_eq!(ro.obs_store.observations.len(), 4);
    assert_eq!(ro.sys_store.num_entities(), 2);
    let err = ro.sys_store.add(FeatureDesc::new("urn:sys:3", "Tower")).expect_err("read-only");
    assert!(matches!(err, AegisError::ReadOnly(_)));
}

#[test]
fn test_backup_and_restore() {
    let (db, _, ds) = station();
    for t in 0..4 {
        db.obs_store.observations.add(temperature(ds, t)).unwrap();
    }
    let mut image = Vec::new();
    let written = db.backup(&mut image).expect("backup should succeed");
    assert_eq!(written as usize, image.len());

    db.obs_store.observations.clear().expect("clear should succeed");
    assert!(db.obs_store.observations.is_empty());

    db.restore(&mut image.as_slice()).expect("restore should succeed");
    assert_eq!(db.obs_store.observations.len(), 4);
    let range = db
        .obs_store
        .observations
        .statistics(&RecordFilter::new(), None)
        .unwrap()
        .pop()
        .expect("series")
        .phenomenon_time;
    assert_eq!(range, TimeRange::new(ts(0), ts(3)));
}
