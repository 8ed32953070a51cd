//! Ready queue backends.

pub mod memory;

pub use memory::ReadyQueue;
