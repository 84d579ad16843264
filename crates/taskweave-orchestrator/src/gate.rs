use std::sync::Arc;
use taskweave_core::{TaskweaveError, TaskweaveResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Bounded admission control for concurrently running sub-tasks.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot in a [`ConcurrencyGate`]. The slot is released when dropped,
/// on every exit path including unwinding.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` holders at once.
    /// The capacity is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, or until `cancel` fires.
    ///
    /// On cancellation no slot is held and [`TaskweaveError::Cancelled`] is returned.
    pub async fn acquire(&self, cancel: &CancellationToken) -> TaskweaveResult<GatePermit> {
        if cancel.is_cancelled() {
            return Err(TaskweaveError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TaskweaveError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                let permit = permit
                    .map_err(|_| TaskweaveError::Orchestrator("Concurrency gate closed".into()))?;
                Ok(GatePermit { _permit: permit })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
