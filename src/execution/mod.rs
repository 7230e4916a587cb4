//! Execution controls
//!
//! Solve time limits and compile cancellation.

mod timeout;

pub use timeout::{Cancellation, DeadlineExceeded, SearchDeadline};
