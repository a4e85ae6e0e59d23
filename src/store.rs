//! Storage boundary. The scheduler and batch worker only ever see this
//! trait; the concrete wire format lives behind it.

use anyhow::Result;
use async_trait::async_trait;

use crate::stage::AggregationType;
use crate::types::{AggregateRecord, Granularity, MetricRow, ScheduleId, TimeSlice};

#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Enumerate schedules with unaggregated data for this slice and stage.
    async fn pending_schedules(
        &self,
        slice: TimeSlice,
        stage: AggregationType,
    ) -> Result<Vec<ScheduleId>>;

    /// Fetch one schedule's rows at the given source granularity within
    /// the slice.
    async fn fetch_rows(
        &self,
        schedule_id: ScheduleId,
        slice: TimeSlice,
        source: Granularity,
    ) -> Result<Vec<MetricRow>>;

    /// Durably write a batch of aggregate records. Writes are idempotent:
    /// keyed by (schedule, bucket, start).
    async fn write_aggregates(&self, records: &[AggregateRecord]) -> Result<()>;

    /// Drop the pending-index entries for a fully aggregated slice so the
    /// next discovery pass comes back empty.
    async fn purge_index(&self, slice: TimeSlice, stage: AggregationType) -> Result<()>;
}
