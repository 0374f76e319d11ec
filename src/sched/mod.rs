//! Cooperative scheduler: run queue, selection, suspend/resume, yield.

pub(crate) mod core;
pub(crate) mod queue;

pub use self::core::{
    current, init, init_with, join, schedule, spawn, spawn_with_stack, stats, suspend, unsuspend,
    yield_all, yield_now, RuntimeConfig, SchedStats, YieldOutcome, DEFAULT_STACK_SIZE,
    MIN_STACK_SIZE,
};

pub(crate) use self::core::run_queue_empty;
