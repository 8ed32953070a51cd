//! Infrastructure backing the scheduler.

pub mod queue;
pub use queue::ReadyQueue;
