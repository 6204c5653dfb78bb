//! Admission control for external processes.
//!
//! At most `capacity` slots are outstanding at once. A slot is released when
//! it is dropped, so every exit path of the work it guards gives it back.
//! There is no timeout or cancellation: a child process that never exits keeps
//! its slot for the rest of the run and lowers the effective parallelism.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("concurrency gate closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, GateError>;

/// Bounded pool of execution slots shared by everything that spawns processes.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    peak: AtomicUsize,
}

/// One or more held slots. Dropping it releases them.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    count: usize,
    counters: Arc<Counters>,
}

impl Slot {
    /// Number of slots this permit holds.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.counters
            .outstanding
            .fetch_sub(self.count, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// Gate with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Gate sized to the number of available processing units.
    pub fn from_available_parallelism() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::new(cpus)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at the same time.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Slot> {
        self.acquire_many(1).await
    }

    /// Wait until `n` slots are free and take them together.
    ///
    /// `n` is clamped to the capacity, so a work item that needs several
    /// processes at once can still run on a small gate.
    pub async fn acquire_many(&self, n: usize) -> Result<Slot> {
        let n = n.clamp(1, self.capacity);
        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(n as u32)
            .await
            .map_err(|_| GateError::Closed)?;

        let now = self.counters.outstanding.fetch_add(n, Ordering::SeqCst) + n;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        tracing::trace!(held = now, capacity = self.capacity, "slot acquired");

        Ok(Slot {
            _permit: permit,
            count: n,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Give a slot back. Equivalent to dropping it.
    pub fn release(&self, slot: Slot) {
        drop(slot);
    }
}
