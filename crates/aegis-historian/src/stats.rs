//! Aegis Series Statistics
//!
//! Record counts and histograms computed from key ranks instead of
//! scanning: the number of records between two keys of one series is the
//! difference of their positions in the sorted record map.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::keys::RecordKey;
use aegis_common::{AegisError, BigId, Result, TimeRange};
use aegis_storage::SortedMap;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Upper bound on the bins of one histogram.
pub const MAX_HISTOGRAM_BINS: i64 = 100_000;

/// Summary of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesStats {
    pub stream_id: BigId,
    pub sub_entity_id: BigId,
    /// `None` for a continuous series.
    pub result_time: Option<DateTime<Utc>>,
    pub phenomenon_time: TimeRange,
    pub result_time_range: TimeRange,
    pub total_count: u64,
    pub histogram: Option<Histogram>,
}

/// Record counts over half-open bins `[start + i*bin, start + (i+1)*bin)`;
/// the last bin ends at the inclusive end of the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Histogram {
    pub start: DateTime<Utc>,
    pub bin_seconds: i64,
    pub counts: Vec<u64>,
}

impl Histogram {
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Number of records of `series_id` with a timestamp in the closed `range`.
pub fn count_in_range<R>(records: &SortedMap<RecordKey, R>, series_id: u64, range: &TimeRange) -> Result<u64> {
    if range.start > range.end {
        return Ok(0);
    }
    let first = records
        .ceiling_key(&RecordKey::new(series_id, range.start))?
        .filter(|k| k.series_id == series_id && k.timestamp <= range.end);
    let Some(first) = first else {
        return Ok(0);
    };
    let Some(last) = records.floor_key(&RecordKey::new(series_id, range.end))? else {
        return Ok(0);
    };
    Ok(records.rank(&last) - records.rank(&first) + 1)
}

/// Records of `series_id` in `[start, end)`.
///
/// Neither bound need be a stored key: the rank of a missing key is the
/// number of keys below it, so no boundary correction is needed.
fn count_half_open<R>(
    records: &SortedMap<RecordKey, R>,
    series_id: u64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> u64 {
    let lower = records.rank(&RecordKey::new(series_id, start));
    let upper = records.rank(&RecordKey::new(series_id, end));
    upper.saturating_sub(lower)
}

/// Histogram of `series_id` over `range` split into `bin` wide bins. The
/// last bin is closed at `range.end`, so it may be narrower than `bin`.
pub fn histogram<R>(
    records: &SortedMap<RecordKey, R>,
    series_id: u64,
    range: &TimeRange,
    bin: Duration,
) -> Result<Histogram> {
    if bin <= Duration::zero() {
        return Err(AegisError::InvalidArgument(format!(
            "histogram bin size must be positive, got {}s",
            bin.num_seconds()
        )));
    }
    if range.start > range.end {
        return Ok(Histogram {
            start: range.start,
            bin_seconds: bin.num_seconds(),
            counts: Vec::new(),
        });
    }
    let bins = range.duration().num_milliseconds() / bin.num_milliseconds().max(1) + 1;
    if bins > MAX_HISTOGRAM_BINS {
        return Err(AegisError::InvalidArgument(format!(
            "histogram over {} to {} with {}s bins needs {} bins, more than {}",
            range.start.to_rfc3339(),
            range.end.to_rfc3339(),
            bin.num_seconds(),
            bins,
            MAX_HISTOGRAM_BINS
        )));
    }

    let mut counts = Vec::with_capacity(bins as usize);
    let mut lower = range.start;
    for i in 0..bins {
        if i + 1 == bins {
            counts.push(count_in_range(records, series_id, &TimeRange::new(lower, range.end))?);
        } else {
            let upper = lower + bin;
            counts.push(count_half_open(records, series_id, lower, upper));
            lower = upper;
        }
    }
    Ok(Histogram {
        start: range.start,
        bin_seconds: bin.num_seconds(),
        counts,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_storage::{BincodeCodec, Journal, MapStore};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn series_map(times: &[(u64, i64)]) -> SortedMap<RecordKey, u32> {
        let engine = MapStore::in_memory();
        let journal = Arc::new(Journal::new("stats"));
        let map: SortedMap<RecordKey, u32> = engine.open_map("stats:records", &journal, Arc::new(BincodeCodec));
        for (sid, t) in times {
            map.put(&RecordKey::new(*sid, ts(*t)), &0).expect("put should succeed");
        }
        map
    }

    #[test]
    fn test_count_in_range() {
        let map = series_map(&[(1, 10), (1, 20), (1, 30), (2, 15), (2, 25)]);
        assert_eq!(count_in_range(&map, 1, &TimeRange::new(ts(10), ts(30))).unwrap(), 3);
        assert_eq!(count_in_range(&map, 1, &TimeRange::new(ts(11), ts(29))).unwrap(), 1);
        assert_eq!(count_in_range(&map, 1, &TimeRange::new(ts(21), ts(29))).unwrap(), 0);
        assert_eq!(count_in_range(&map, 2, &TimeRange::all()).unwrap(), 2);
        assert_eq!(count_in_range(&map, 3, &TimeRange::all()).unwrap(), 0);
    }

    #[test]
    fn test_histogram_bins() {
        let map = series_map(&[(1, 0), (1, 10), (1, 15), (1, 29), (1, 30), (2, 5)]);
        let hist = histogram(&map, 1, &TimeRange::new(ts(0), ts(30)), Duration::seconds(10)).unwrap();
        assert_eq!(hist.counts, vec![1, 2, 1, 1]);
        assert_eq!(hist.total(), 5);

        let hist = histogram(&map, 1, &TimeRange::new(ts(0), ts(25)), Duration::seconds(10)).unwrap();
        assert_eq!(hist.counts, vec![1, 2, 0]);

        assert!(histogram(&map, 1, &TimeRange::all(), Duration::zero()).is_err());
    }

    #[test]
    fn test_histogram_rejects_unbounded_range() {
        let map = series_map(&[(1, 0), (1, 10)]);
        let err = histogram(&map, 1, &TimeRange::all(), Duration::seconds(1)).expect_err("too many bins");
        assert!(matches!(err, AegisError::InvalidArgument(_)));

        let widest = Duration::seconds(MAX_HISTOGRAM_BINS - 1);
        let hist = histogram(&map, 1, &TimeRange::new(ts(0), ts(0) + widest), Duration::seconds(1)).unwrap();
        assert_eq!(hist.counts.len() as i64, MAX_HISTOGRAM_BINS);
        assert_eq!(hist.total(), 2);
    }
}
