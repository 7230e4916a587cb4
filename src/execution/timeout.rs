//! Solve deadlines and compile cancellation
//!
//! Both are cooperative: the owner checks them at safe points.
//! - [`SearchDeadline`] is checked by the backend before it starts and
//!   again when the solver gives up; the remaining budget becomes the
//!   solver's own timeout.
//! - [`Cancellation`] is checked by the compiler between views and before
//!   the solver is invoked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline exceeded error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Search exceeded time limit of {limit:?} (ran for {elapsed:?})")]
pub struct DeadlineExceeded {
    pub limit: Duration,
    pub elapsed: Duration,
}

/// Wall-clock budget for one solve call
#[derive(Debug, Clone)]
pub struct SearchDeadline {
    start_time: Instant,
    limit: Duration,
}

impl SearchDeadline {
    /// Start the clock now
    pub fn new(limit: Duration) -> Self {
        SearchDeadline {
            start_time: Instant::now(),
            limit,
        }
    }

    /// Check whether the solve may continue.
    ///
    /// The limit is inclusive: a zero limit fails on the first check.
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        let elapsed = self.start_time.elapsed();
        if elapsed >= self.limit {
            return Err(DeadlineExceeded {
                limit: self.limit,
                elapsed,
            });
        }
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start_time.elapsed())
    }
}

/// Cloneable cancellation flag for a compilation request
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Cancellation::default()
    }

    /// Request cancellation; takes effect at the next check
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
