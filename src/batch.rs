//! Batch aggregation worker: waits for its batch's fetches, computes one
//! aggregate record per schedule, persists them, then settles the run's
//! bookkeeping. Success counts the latch down; any failure aborts it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::scheduler::AggregationState;
use crate::types::{AggregateRecord, MetricRow};

/// Everything one worker invocation needs. Created fresh per batch and
/// consumed by it.
pub struct BatchAggregationState {
    pub fetches: Vec<JoinHandle<Result<Vec<MetricRow>>>>,
    pub run: Arc<AggregationState>,
    pub started: Instant,
}

pub async fn aggregate_batch(batch: BatchAggregationState) {
    let n = batch.fetches.len();
    let run = batch.run;

    match aggregate_inner(&run, batch.fetches).await {
        Ok(records) => {
            let left = run
                .remaining
                .fetch_sub(n, Ordering::SeqCst)
                .saturating_sub(n);
            run.permits.release(n);
            run.latch.count_down(n);
            debug!(
                "aggregated batch of {n} {} schedules for {} in {:?} ({records} records, {left} schedules left)",
                run.stage,
                run.slice,
                batch.started.elapsed()
            );
        }
        Err(err) => {
            run.permits.release(n);
            warn!(
                "batch of {n} {} schedules for {} failed after {:?}: {err:#}",
                run.stage,
                run.slice,
                batch.started.elapsed()
            );
            run.latch.abort(format!(
                "error aggregating a batch of {} data for {}: {err:#}",
                run.stage, run.slice
            ));
        }
    }
}

/// Resolve every fetch, compute, and persist. Returns the number of
/// records written.
async fn aggregate_inner(
    run: &Arc<AggregationState>,
    fetches: Vec<JoinHandle<Result<Vec<MetricRow>>>>,
) -> Result<usize> {
    let results = try_join_all(fetches)
        .await
        .map_err(|err| anyhow!("fetch task failed: {err}"))?;

    let mut records: Vec<AggregateRecord> = Vec::with_capacity(results.len());
    for rows in results {
        let rows = rows?;
        // A schedule can be indexed as pending yet have no rows in the
        // slice (e.g. its samples were purged); it still counts as done.
        if let Some(record) = run.stage.compute(&rows, run.slice) {
            records.push(record);
        }
    }

    if !records.is_empty() {
        run.store.write_aggregates(&records).await?;
    }
    Ok(records.len())
}
