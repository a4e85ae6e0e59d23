//! Rollup stages. Each variant names the granularity it reads, the
//! granularity it writes, and the pending-index partition it consumes.
//! Adding a stage means adding a variant here, not touching the scheduler
//! or the batch worker.

use std::fmt;

use crate::compute;
use crate::types::{AggregateRecord, Granularity, MetricRow, TimeSlice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    RawToOneHour,
    OneHourToSixHour,
    SixHourToDay,
}

impl AggregationType {
    pub const ALL: [AggregationType; 3] = [
        AggregationType::RawToOneHour,
        AggregationType::OneHourToSixHour,
        AggregationType::SixHourToDay,
    ];

    /// Granularity of the rows this stage reads.
    pub fn source(&self) -> Granularity {
        match self {
            AggregationType::RawToOneHour => Granularity::Raw,
            AggregationType::OneHourToSixHour => Granularity::OneHour,
            AggregationType::SixHourToDay => Granularity::SixHour,
        }
    }

    /// Granularity of the records this stage writes.
    pub fn target(&self) -> Granularity {
        match self {
            AggregationType::RawToOneHour => Granularity::OneHour,
            AggregationType::OneHourToSixHour => Granularity::SixHour,
            AggregationType::SixHourToDay => Granularity::Day,
        }
    }

    /// Pending-index partition listing schedules with unaggregated data
    /// for this stage, named by the bucket being produced.
    pub fn index_partition(&self) -> &'static str {
        self.target().as_str()
    }

    /// Compute one aggregate record from one schedule's resolved rows.
    /// Returns `None` for an empty row set.
    pub fn compute(&self, rows: &[MetricRow], slice: TimeSlice) -> Option<AggregateRecord> {
        compute::aggregate_rows(rows, slice.start_ms, self.target())
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationType::RawToOneHour => "raw->1h",
            AggregationType::OneHourToSixHour => "1h->6h",
            AggregationType::SixHourToDay => "6h->day",
        };
        f.write_str(name)
    }
}
