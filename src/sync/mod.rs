//! Synchronization primitives built on top of the scheduler's block/unblock
//! operations, grounded in `threads/synch.c`.
//!
//! All three primitives here disable interrupts for their critical
//! sections rather than use a lower-level spinlock: on the single core
//! this crate targets, that's the same discipline Pintos uses, and it
//! keeps the scheduler the single source of truth for which thread runs
//! next.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
