//! Frame admission: decides per arriving frame whether it enters the pipeline.
//!
//! The gate never blocks the frame source. Every decision is a handful of
//! atomic operations, and the in-flight flag guarantees that at most one
//! admitted frame is being processed at any time. The flag only clears through
//! [`AdmissionController::mark_complete`] (directly or via a dropped
//! [`AdmissionPermit`]).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

const NEVER: u64 = u64::MAX;

/// Sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Poll mode: admit at most once per period, and only when nothing is in flight.
    Interval(Duration),
    /// Stream mode: admit every n-th arrival, dropping it anyway while a frame is in flight.
    Stride(u32),
}

/// Snapshot of the gate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub arrivals: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub completed: u64,
}

pub struct AdmissionController {
    mode: AdmissionMode,
    in_flight: AtomicBool,
    arrivals: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    epoch: Instant,
    last_admit_ns: AtomicU64,
}

impl AdmissionController {
    pub fn new(mode: AdmissionMode) -> Self {
        let mode = match mode {
            AdmissionMode::Stride(0) => AdmissionMode::Stride(1),
            other => other,
        };
        Self {
            mode,
            in_flight: AtomicBool::new(false),
            arrivals: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            epoch: Instant::now(),
            last_admit_ns: AtomicU64::new(NEVER),
        }
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// Accept or reject the frame arriving now.
    pub fn try_admit(&self) -> bool {
        self.try_admit_at(Instant::now())
    }

    /// Same as [`try_admit`](Self::try_admit) with an explicit clock reading.
    pub fn try_admit_at(&self, now: Instant) -> bool {
        let arrival = self.arrivals.fetch_add(1, Ordering::Relaxed) + 1;
        let now_ns = now.saturating_duration_since(self.epoch).as_nanos() as u64;

        let last = self.last_admit_ns.load(Ordering::Acquire);
        let sampled = match self.mode {
            AdmissionMode::Interval(period) => {
                last == NEVER || now_ns.saturating_sub(last) >= period.as_nanos() as u64
            }
            AdmissionMode::Stride(stride) => arrival % u64::from(stride) == 0,
        };
        if !sampled {
            return self.reject(arrival, "not sampled");
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.reject(arrival, "frame in flight");
        }

        // Claim the period atomically; a concurrent arrival that saw the same `last` loses.
        if let AdmissionMode::Interval(_) = self.mode {
            if self
                .last_admit_ns
                .compare_exchange(last, now_ns, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                self.in_flight.store(false, Ordering::Release);
                return self.reject(arrival, "period already taken");
            }
        }
        self.admitted.fetch_add(1, Ordering::Relaxed);
        trace!(arrival, "frame admitted");
        true
    }

    fn reject(&self, arrival: u64, reason: &'static str) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        trace!(arrival, reason, "frame dropped");
        false
    }

    /// Clear the in-flight flag once the admitted frame finished (success or failure).
    pub fn mark_complete(&self) {
        if self.in_flight.swap(false, Ordering::AcqRel) {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            trace!("mark_complete without a frame in flight");
        }
    }

    /// Admit and return a permit that completes the frame when dropped.
    pub fn try_acquire(&self) -> Option<AdmissionPermit<'_>> {
        self.try_admit().then_some(AdmissionPermit { controller: self })
    }

    /// Permit for a frame that was already admitted elsewhere (e.g. at stream arrival).
    pub fn completion_guard(&self) -> AdmissionPermit<'_> {
        AdmissionPermit { controller: self }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            arrivals: self.arrivals.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// RAII handle for an in-flight frame; dropping it calls `mark_complete`.
#[must_use = "dropping the permit immediately completes the frame"]
pub struct AdmissionPermit<'a> {
    controller: &'a AdmissionController,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.controller.mark_complete();
    }
}
