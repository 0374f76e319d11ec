//! weft — cooperative user-space threading core.
//!
//! Multiplexes many logical threads onto a single OS execution stream by
//! saving and restoring machine state at explicit suspension points. There
//! is no parallelism and no preemption: a thread runs until it yields,
//! blocks, or dies, and the run queue is drained in strict FIFO order with
//! the program's original ("main") stream as the idle fallback.
//!
//! ```no_run
//! use weft::{join, spawn, yield_now};
//!
//! let t = spawn("worker", || {
//!     println!("first turn");
//!     yield_now();
//!     println!("second turn");
//! });
//! join(t);
//! ```
//!
//! Blocking primitives ([`sync::Mutex`], [`sync::Condvar`]) are built on
//! the [`suspend`]/[`unsuspend`] protocol and wake waiters in FIFO order.
//! Context transfer itself lives in [`switch`]; by default it skips
//! floating-point and signal-mask state for speed, with full fidelity as an
//! opt-in ([`switch::SwitchFlags`], [`RuntimeConfig`]).
//!
//! Each OS thread that uses the API gets its own independent scheduler,
//! initialized lazily on first use.

mod fault;
pub mod sched;
pub mod switch;
pub mod sync;
pub mod thread;

pub use sched::{
    current, init, init_with, join, schedule, spawn, spawn_with_stack, stats, suspend, unsuspend,
    yield_all, yield_now, RuntimeConfig, SchedStats, YieldOutcome, DEFAULT_STACK_SIZE,
    MIN_STACK_SIZE,
};
pub use switch::SwitchFlags;
pub use thread::{Tid, ThreadState};
