//! End-to-end tests for aggregation scheduling and batch execution,
//! driven through an in-memory store with injectable failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use rollup::permits::PermitGate;
use rollup::runner::Aggregator;
use rollup::stage::AggregationType;
use rollup::store::MetricStore;
use rollup::types::{AggregateRecord, Granularity, MetricRow, ScheduleId, TimeSlice};

const HOUR_MS: i64 = 3_600_000;

fn hour_slice() -> TimeSlice {
    TimeSlice::new(0, HOUR_MS)
}

#[derive(Default)]
struct MockStore {
    schedules: Vec<ScheduleId>,
    index_fails: bool,
    failing_fetches: HashSet<ScheduleId>,
    empty_fetches: HashSet<ScheduleId>,
    write_fails: bool,
    fetch_delay_ms: u64,
    fetch_in_flight: AtomicUsize,
    fetch_high_water: AtomicUsize,
    write_batches: Mutex<Vec<usize>>,
    written: Mutex<Vec<AggregateRecord>>,
    purges: AtomicUsize,
}

impl MockStore {
    fn with_schedules(n: i32) -> Self {
        Self {
            schedules: (1..=n).collect(),
            ..Default::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes = self.write_batches.lock().unwrap().clone();
        sizes.sort_unstable();
        sizes
    }

    fn written_schedule_ids(&self) -> HashSet<ScheduleId> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|rec| rec.schedule_id)
            .collect()
    }
}

#[async_trait]
impl MetricStore for MockStore {
    async fn pending_schedules(
        &self,
        _slice: TimeSlice,
        _stage: AggregationType,
    ) -> Result<Vec<ScheduleId>> {
        if self.index_fails {
            return Err(anyhow!("index partition unavailable"));
        }
        Ok(self.schedules.clone())
    }

    async fn fetch_rows(
        &self,
        schedule_id: ScheduleId,
        slice: TimeSlice,
        _source: Granularity,
    ) -> Result<Vec<MetricRow>> {
        let now = self.fetch_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.fetch_high_water.fetch_max(now, Ordering::SeqCst);
        if self.fetch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.fetch_delay_ms)).await;
        }
        self.fetch_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_fetches.contains(&schedule_id) {
            return Err(anyhow!("schedule {schedule_id} rows unreadable"));
        }
        if self.empty_fetches.contains(&schedule_id) {
            return Ok(vec![]);
        }
        Ok(vec![
            MetricRow::raw(schedule_id, slice.start_ms + 1_000, 1.0),
            MetricRow::raw(schedule_id, slice.start_ms + 2_000, 3.0),
        ])
    }

    async fn write_aggregates(&self, records: &[AggregateRecord]) -> Result<()> {
        if self.write_fails {
            return Err(anyhow!("bulk write rejected"));
        }
        self.write_batches.lock().unwrap().push(records.len());
        self.written.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn purge_index(&self, _slice: TimeSlice, _stage: AggregationType) -> Result<()> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn wait_for_permits_drained(gate: &PermitGate) {
    for _ in 0..200 {
        if gate.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("permits leaked: {} still in flight", gate.in_flight());
}

#[tokio::test]
async fn test_five_schedules_batch_size_two() {
    let store = Arc::new(MockStore::with_schedules(5));
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let stats = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    assert_eq!(stats.schedules, 5);
    assert_eq!(stats.batches, 3);
    assert_eq!(store.batch_sizes(), vec![1, 2, 2]);
    assert_eq!(store.written_schedule_ids(), (1..=5).collect());
    assert_eq!(store.purges.load(Ordering::SeqCst), 1);
    wait_for_permits_drained(&gate).await;
}

#[tokio::test]
async fn test_zero_schedules_completes_immediately() {
    let store = Arc::new(MockStore::with_schedules(0));
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let stats = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    assert_eq!(stats.schedules, 0);
    assert_eq!(stats.batches, 0);
    assert!(store.write_batches.lock().unwrap().is_empty());
    assert_eq!(gate.high_water(), 0);
}

#[tokio::test]
async fn test_batch_count_matches_ceiling() {
    let store = Arc::new(MockStore::with_schedules(10));
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 3);

    let stats = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    assert_eq!(stats.batches, 4);
    assert_eq!(store.batch_sizes(), vec![1, 3, 3, 3]);
    let total: usize = store.batch_sizes().iter().sum();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn test_index_failure_aborts_without_batches() {
    let store = Arc::new(MockStore {
        index_fails: true,
        ..MockStore::with_schedules(5)
    });
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let err = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("error retrieving"));
    assert!(err.to_string().contains("index partition unavailable"));
    assert!(store.write_batches.lock().unwrap().is_empty());
    assert_eq!(gate.in_flight(), 0);
    assert_eq!(store.purges.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fetch_failure_aborts_run_with_root_cause() {
    let store = Arc::new(MockStore {
        failing_fetches: [3].into(),
        ..MockStore::with_schedules(5)
    });
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let err = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("schedule 3 rows unreadable"));
    assert_eq!(store.purges.load(Ordering::SeqCst), 0);
    wait_for_permits_drained(&gate).await;
}

#[tokio::test]
async fn test_write_failure_aborts_run() {
    let store = Arc::new(MockStore {
        write_fails: true,
        ..MockStore::with_schedules(4)
    });
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let err = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bulk write rejected"));
    assert_eq!(store.purges.load(Ordering::SeqCst), 0);
    wait_for_permits_drained(&gate).await;
}

#[tokio::test]
async fn test_aborted_run_still_releases_other_batches_permits() {
    // Second batch fails; the third batch is already dispatched and must
    // still return its permits even though the run is aborted.
    let store = Arc::new(MockStore {
        failing_fetches: [3].into(),
        fetch_delay_ms: 20,
        ..MockStore::with_schedules(5)
    });
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let err = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("rows unreadable"));
    wait_for_permits_drained(&gate).await;
}

#[tokio::test]
async fn test_permit_capacity_bounds_concurrent_fetches() {
    let store = Arc::new(MockStore {
        fetch_delay_ms: 20,
        ..MockStore::with_schedules(8)
    });
    let gate = Arc::new(PermitGate::new(2));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    assert!(
        store.fetch_high_water.load(Ordering::SeqCst) <= 2,
        "more fetches in flight than permits: {}",
        store.fetch_high_water.load(Ordering::SeqCst)
    );
    assert!(gate.high_water() <= 2);
    wait_for_permits_drained(&gate).await;
}

#[tokio::test]
async fn test_empty_fetch_still_counts_schedule() {
    let store = Arc::new(MockStore {
        empty_fetches: [2].into(),
        ..MockStore::with_schedules(3)
    });
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 3);

    let stats = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    assert_eq!(stats.schedules, 3);
    assert_eq!(store.batch_sizes(), vec![2]);
    assert_eq!(store.written_schedule_ids(), [1, 3].into());
}

#[tokio::test]
async fn test_records_carry_slice_start_and_target_bucket() {
    let store = Arc::new(MockStore::with_schedules(2));
    let gate = Arc::new(PermitGate::new(30));
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();

    let written = store.written.lock().unwrap();
    assert_eq!(written.len(), 2);
    for rec in written.iter() {
        assert_eq!(rec.timestamp_ms, 0);
        assert_eq!(rec.bucket, Granularity::OneHour);
        assert_eq!(rec.min, 1.0);
        assert_eq!(rec.max, 3.0);
        assert_eq!(rec.avg, 2.0);
        assert_eq!(rec.sample_count, 2);
    }
}

#[tokio::test]
async fn test_closed_gate_aborts_scheduling_as_interrupt() {
    let store = Arc::new(MockStore::with_schedules(3));
    let gate = Arc::new(PermitGate::new(30));
    gate.close();
    let aggregator = Aggregator::new(store.clone(), gate.clone(), 2);

    let err = aggregator
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("interrupt"));
    assert!(store.write_batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_gate_shared_across_sequential_runs() {
    let gate = Arc::new(PermitGate::new(4));

    let first = Arc::new(MockStore::with_schedules(6));
    Aggregator::new(first.clone(), gate.clone(), 2)
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();
    wait_for_permits_drained(&gate).await;

    let second = Arc::new(MockStore::with_schedules(6));
    Aggregator::new(second.clone(), gate.clone(), 2)
        .run(hour_slice(), AggregationType::RawToOneHour)
        .await
        .unwrap();
    wait_for_permits_drained(&gate).await;

    assert_eq!(second.written_schedule_ids().len(), 6);
}
