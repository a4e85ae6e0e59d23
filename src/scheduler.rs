//! Aggregation scheduling: turns "slice T needs stage K" into a set of
//! batch worker tasks. The dispatch loop acquires one permit per schedule,
//! spawns the fetch, and cuts batches at the configured size; it never
//! waits on a batch itself — the latch is the only completion channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::batch::{self, BatchAggregationState};
use crate::latch::SignalingLatch;
use crate::permits::PermitGate;
use crate::stage::AggregationType;
use crate::store::MetricStore;
use crate::types::{MetricRow, ScheduleId, TimeSlice};

/// Shared state of one aggregation run. Owned by the run, shared by
/// reference with every batch spawned from it.
pub struct AggregationState {
    pub slice: TimeSlice,
    pub stage: AggregationType,
    pub batch_size: usize,
    pub store: Arc<dyn MetricStore>,
    pub permits: Arc<PermitGate>,
    pub remaining: Arc<AtomicUsize>,
    pub latch: Arc<SignalingLatch>,
}

impl AggregationState {
    pub fn new(
        slice: TimeSlice,
        stage: AggregationType,
        batch_size: usize,
        store: Arc<dyn MetricStore>,
        permits: Arc<PermitGate>,
    ) -> Self {
        Self {
            slice,
            stage,
            batch_size,
            store,
            permits,
            remaining: Arc::new(AtomicUsize::new(0)),
            latch: Arc::new(SignalingLatch::new()),
        }
    }
}

/// Query the pending-schedule index and schedule every batch for the run.
/// Returns the number of schedules discovered (zero when the index lookup
/// failed; the latch carries the error).
pub async fn schedule_slice(state: &Arc<AggregationState>) -> usize {
    match state.store.pending_schedules(state.slice, state.stage).await {
        Ok(schedules) => {
            let count = schedules.len();
            dispatch(state, schedules).await;
            count
        }
        Err(err) => {
            warn!(
                "{} aggregation for {} cannot proceed: index retrieval failed: {err:#}",
                state.stage, state.slice
            );
            state.latch.abort(format!(
                "error retrieving {} index entries for {}: {err:#}",
                state.stage, state.slice
            ));
            0
        }
    }
}

/// Schedule batch jobs for an already-materialized index result.
pub async fn dispatch(state: &Arc<AggregationState>, schedules: Vec<ScheduleId>) {
    let started = Instant::now();
    state.remaining.store(schedules.len(), Ordering::SeqCst);
    state.latch.arm(schedules.len());

    if schedules.is_empty() {
        debug!("no pending {} schedules for {}", state.stage, state.slice);
        return;
    }

    let mut fetches: Vec<JoinHandle<Result<Vec<MetricRow>>>> =
        Vec::with_capacity(state.batch_size);
    let mut batch_started = Instant::now();
    let mut batches = 0usize;

    for schedule_id in &schedules {
        if let Err(err) = state.permits.acquire().await {
            warn!(
                "interrupt while scheduling {} aggregation tasks for {}: {err:#}",
                state.stage, state.slice
            );
            state.latch.abort(format!(
                "interrupt while scheduling {} aggregation tasks for {}: {err:#}",
                state.stage, state.slice
            ));
            return;
        }
        fetches.push(spawn_fetch(state, *schedule_id));
        if fetches.len() == state.batch_size {
            submit_batch(
                state,
                std::mem::replace(&mut fetches, Vec::with_capacity(state.batch_size)),
                batch_started,
            );
            batches += 1;
            batch_started = Instant::now();
        }
    }
    if !fetches.is_empty() {
        submit_batch(state, fetches, batch_started);
        batches += 1;
    }

    debug!(
        "scheduled {batches} {} batches for {} schedules of {} in {:?}",
        state.stage,
        schedules.len(),
        state.slice,
        started.elapsed()
    );
}

fn spawn_fetch(
    state: &Arc<AggregationState>,
    schedule_id: ScheduleId,
) -> JoinHandle<Result<Vec<MetricRow>>> {
    let store = state.store.clone();
    let slice = state.slice;
    let source = state.stage.source();
    tokio::spawn(async move { store.fetch_rows(schedule_id, slice, source).await })
}

fn submit_batch(
    state: &Arc<AggregationState>,
    fetches: Vec<JoinHandle<Result<Vec<MetricRow>>>>,
    started: Instant,
) {
    let batch_state = BatchAggregationState {
        fetches,
        run: state.clone(),
        started,
    };
    tokio::spawn(batch::aggregate_batch(batch_state));
}
