//! Scheduler module
//!
//! Periodic pipeline work:
//! - `Scheduler::tick` - reclaim, admit under budget, dispatch batches
//! - `Worker` - executes one provider batch
//! - `Sweeper` - returns orphaned running jobs to pending
//! - `Cadence` - in-process interval loops for the above

mod cadence;
mod sweeper;
mod tick;
mod worker;

pub use cadence::{Cadence, CadenceHandle};
pub use sweeper::Sweeper;
pub use tick::Scheduler;
pub use worker::{BatchReport, JobOutcome, Worker};
