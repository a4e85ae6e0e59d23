//! Run orchestration. One `run` call aggregates a single (slice, stage)
//! pair end to end; `run_hour` cascades the coarser stages whenever the
//! hour closes their windows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::permits::PermitGate;
use crate::scheduler::{self, AggregationState};
use crate::stage::AggregationType;
use crate::store::MetricStore;
use crate::time_windows;
use crate::types::TimeSlice;

pub struct Aggregator {
    store: Arc<dyn MetricStore>,
    permits: Arc<PermitGate>,
    batch_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub schedules: usize,
    pub batches: usize,
    pub elapsed: Duration,
}

impl Aggregator {
    pub fn new(store: Arc<dyn MetricStore>, permits: Arc<PermitGate>, batch_size: usize) -> Self {
        Self {
            store,
            permits,
            batch_size,
        }
    }

    /// Aggregate one stage of one time slice. Resolves when every batch
    /// has finished or the run was aborted; the error carries the first
    /// failure's root cause.
    pub async fn run(&self, slice: TimeSlice, stage: AggregationType) -> Result<RunStats> {
        let started = Instant::now();
        let state = Arc::new(AggregationState::new(
            slice,
            stage,
            self.batch_size,
            self.store.clone(),
            self.permits.clone(),
        ));

        let schedules = scheduler::schedule_slice(&state).await;
        state.latch.wait().await.map_err(|message| anyhow!(message))?;

        // Aborts skip the purge so a re-run rediscovers the same pending
        // schedules. A purge failure is not fatal: the entries get
        // re-aggregated next time and the writes overwrite by key.
        if let Err(err) = self.store.purge_index(slice, stage).await {
            warn!("failed to purge {stage} index entries for {slice}: {err:#}");
        }

        let stats = RunStats {
            schedules,
            batches: schedules.div_ceil(self.batch_size),
            elapsed: started.elapsed(),
        };
        info!(
            "finished {stage} aggregation for {slice}: {} schedules in {} batches ({:?})",
            stats.schedules, stats.batches, stats.elapsed
        );
        Ok(stats)
    }

    /// Aggregate a completed hour and cascade: raw->1h always, 1h->6h when
    /// the hour closes a six-hour window, 6h->day when it also closes the
    /// day. A stage failure stops the cascade — a coarser rollup over an
    /// incomplete finer stage would persist wrong numbers.
    pub async fn run_hour(&self, hour: TimeSlice) -> Result<Vec<(AggregationType, RunStats)>> {
        let mut results = Vec::new();

        let stats = self.run(hour, AggregationType::RawToOneHour).await?;
        results.push((AggregationType::RawToOneHour, stats));

        if time_windows::closes_six_hour_window(hour) {
            let six = time_windows::six_hour_slice_of(hour);
            let stats = self.run(six, AggregationType::OneHourToSixHour).await?;
            results.push((AggregationType::OneHourToSixHour, stats));

            if time_windows::closes_day_window(hour) {
                let day = time_windows::day_slice_of(hour);
                let stats = self.run(day, AggregationType::SixHourToDay).await?;
                results.push((AggregationType::SixHourToDay, stats));
            }
        }

        Ok(results)
    }
}
