//! Synchronization primitives shared by tasks and interrupt handlers.

pub mod semaphore;

pub use semaphore::Semaphore;
