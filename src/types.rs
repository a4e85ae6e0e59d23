use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one measurement schedule (a single metric series).
pub type ScheduleId = i32;

/// Rollup bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Raw,
    OneHour,
    SixHour,
    Day,
}

impl Granularity {
    /// Bucket width in milliseconds. Raw samples are point data; their
    /// width is zero.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Granularity::Raw => 0,
            Granularity::OneHour => 3_600_000,
            Granularity::SixHour => 21_600_000,
            Granularity::Day => 86_400_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Raw => "raw",
            Granularity::OneHour => "one_hour",
            Granularity::SixHour => "six_hour",
            Granularity::Day => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The aggregation window being processed: start timestamp plus duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlice {
    pub start_ms: i64,
    pub duration_ms: i64,
}

impl TimeSlice {
    pub fn new(start_ms: i64, duration_ms: i64) -> Self {
        Self {
            start_ms,
            duration_ms,
        }
    }

    /// Exclusive end of the window.
    pub fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms()
    }
}

impl fmt::Display for TimeSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start_ms, self.end_ms())
    }
}

/// One stored measurement row. Raw samples carry `min == max == value`, so
/// the same aggregation math serves every rollup stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub schedule_id: ScheduleId,
    pub timestamp_ms: i64,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricRow {
    /// A raw sample: a single observed value.
    pub fn raw(schedule_id: ScheduleId, timestamp_ms: i64, value: f64) -> Self {
        Self {
            schedule_id,
            timestamp_ms,
            value,
            min: value,
            max: value,
        }
    }
}

/// One computed rollup row, keyed by (schedule, bucket, start) so re-runs
/// overwrite instead of duplicating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub schedule_id: ScheduleId,
    pub bucket: Granularity,
    pub timestamp_ms: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sample_count: u64,
}
