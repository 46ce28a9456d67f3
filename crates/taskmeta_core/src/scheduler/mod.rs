//! Time, timer and executor abstractions used by alarm scheduling.
//!
//! # Responsibility
//! - Define the platform timer contract (`arm`/`cancel` by key).
//! - Provide an in-process timer implementation that dispatches notices.
//! - Provide delayed-job executors for the boot rescan.
//!
//! # Invariants
//! - At most one pending timer exists per `TimerKey`.
//! - Cancelling an unknown key is a no-op.

pub mod clock;
pub mod executor;
pub mod timer;
