//! Blocking synchronization primitives built on suspend/unsuspend.
//!
//! These are the in-tree consumers of the scheduler's blocking protocol:
//! they park threads as blocked and route every wake through
//! [`unsuspend`](crate::sched::unsuspend), the single re-entry point to
//! eligibility.

mod condvar;
mod mutex;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard};
