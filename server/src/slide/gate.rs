//! Decode concurrency gate
//!
//! Opening a slide and decoding a region are the expensive operations in the
//! pipeline; a viewport worth of thumbnail requests arriving at once must
//! not exhaust file handles or memory. The gate admits `capacity` decodes at
//! a time, lets up to `queue_depth` more wait their turn, and fails anything
//! beyond that immediately with `Backpressure` so the client can decide
//! whether to retry. The gate is process-local; each worker bounds its own
//! decode concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::types::SlideError;

pub struct DecodeGate {
    permits: Semaphore,
    queue_depth: usize,
    waiting: AtomicUsize,
}

impl DecodeGate {
    pub fn new(capacity: usize, queue_depth: usize) -> Self {
        Self {
            permits: Semaphore::new(capacity.max(1)),
            queue_depth,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Acquire a decode permit, waiting in the bounded queue if necessary.
    /// The permit is released when dropped.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, SlideError> {
        if let Ok(permit) = self.permits.try_acquire() {
            return Ok(permit);
        }

        let queued = self.waiting.fetch_add(1, Ordering::AcqRel);
        if queued >= self.queue_depth {
            self.waiting.fetch_sub(1, Ordering::AcqRel);
            counter!("wsibrowse_decode_backpressure_total").increment(1);
            return Err(SlideError::Backpressure);
        }

        counter!("wsibrowse_decode_queued_total").increment(1);
        let permit = self.permits.acquire().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        permit.map_err(|_| SlideError::Backpressure)
    }

    /// Requests currently waiting in the queue
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }
}
