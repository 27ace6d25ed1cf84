//! Synchronization primitives for cooperative tasks.

mod semaphore;

pub use semaphore::{Permit, Semaphore, SemaphoreMisuse};
