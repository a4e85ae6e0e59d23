use chrono::{DateTime, Utc};

use crate::types::{Granularity, TimeSlice};

/// Hour-wide slice containing the given timestamp.
pub fn hour_slice_containing(ts_ms: i64) -> TimeSlice {
    slice_containing(ts_ms, Granularity::OneHour)
}

/// The most recently completed hour as of `now`.
pub fn previous_hour_slice(now: DateTime<Utc>) -> TimeSlice {
    let hour_ms = Granularity::OneHour.duration_ms();
    hour_slice_containing(now.timestamp_millis() - hour_ms)
}

/// Six-hour window containing the given hour slice.
pub fn six_hour_slice_of(hour: TimeSlice) -> TimeSlice {
    slice_containing(hour.start_ms, Granularity::SixHour)
}

/// Day window containing the given hour slice.
pub fn day_slice_of(hour: TimeSlice) -> TimeSlice {
    slice_containing(hour.start_ms, Granularity::Day)
}

/// True when the hour is the last one of its six-hour window, i.e. the
/// window is complete once this hour is aggregated.
pub fn closes_six_hour_window(hour: TimeSlice) -> bool {
    hour.end_ms() == six_hour_slice_of(hour).end_ms()
}

/// True when the hour is the last one of its UTC day.
pub fn closes_day_window(hour: TimeSlice) -> bool {
    hour.end_ms() == day_slice_of(hour).end_ms()
}

fn slice_containing(ts_ms: i64, bucket: Granularity) -> TimeSlice {
    let width = bucket.duration_ms();
    let start = ts_ms.div_euclid(width) * width;
    TimeSlice::new(start, width)
}
