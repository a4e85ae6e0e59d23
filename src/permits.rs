//! Permit gate bounding in-flight storage fetches.
//! Shared across concurrent runs so total storage load stays capped.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;

/// Counting gate: a fetch acquires one permit before querying storage and
/// the owning batch releases it once its aggregates are written (or the
/// batch fails). Acquire and release happen on different tasks, so permits
/// are detached from the acquiring scope rather than RAII-held.
#[derive(Debug)]
pub struct PermitGate {
    sem: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl PermitGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            sem: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Acquire one permit, suspending until one is free. Fails only when
    /// the gate has been closed for shutdown.
    pub async fn acquire(&self) -> Result<()> {
        let permit = self.sem.acquire().await.context("permit gate closed")?;
        permit.forget();
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(now, Ordering::Relaxed);
        Ok(())
    }

    /// Return `n` permits to the gate.
    pub fn release(&self, n: usize) {
        self.in_flight.fetch_sub(n, Ordering::Relaxed);
        self.sem.add_permits(n);
    }

    /// Close the gate: pending and future acquires fail. Used to turn a
    /// shutdown signal into a scheduling error.
    pub fn close(&self) {
        self.sem.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of permits ever held at once.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}
