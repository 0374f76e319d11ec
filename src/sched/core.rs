//! Scheduler core: selection, suspend/resume, yield, spawn and join.
//!
//! One scheduler exists per OS thread, held in a thread-local cell and
//! reached through a raw pointer. Raw access instead of `RefCell` is
//! deliberate: a context swap leaves the current borrow's stack frame
//! dormant while another logical thread re-enters this module, so no borrow
//! of scheduler state may ever span a swap. Every function below keeps its
//! borrows confined to blocks that end before control can transfer.
//!
//! Selection policy is strict FIFO over the run queue, with the program's
//! original ("main") execution stream as the fallback once the queue is
//! empty. Main is a pseudo-thread: it owns no registry slot, only a
//! dedicated saved context, and is therefore the one execution that can
//! never suspend.

use crate::fault::fatal;
use crate::switch::{Context, SwitchFlags};
use crate::thread::state::transition_allowed;
use crate::thread::{Registry, Thread, Tid, ThreadState};

use super::queue::RunQueue;

use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Stack handed to [`spawn`] when the configuration does not say otherwise.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Smallest stack the runtime will seed; requests below are rounded up.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Tunables applied by [`init_with`] before the first thread runs.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Default stack size for [`spawn`], in bytes.
    pub stack_size: usize,
    /// State classes the context swap skips; see [`SwitchFlags`].
    pub switch_flags: SwitchFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
            switch_flags: SwitchFlags::default(),
        }
    }
}

/// What a call to [`yield_now`] accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldOutcome {
    /// The caller gave up its turn and has since been resumed.
    Yielded,
    /// Nothing else was runnable (or the caller was the main stream, which
    /// cannot re-queue itself); the call was a no-op for the caller.
    NothingToDo,
}

/// Counters and gauges exposed for observation; see [`stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    /// Context swaps actually performed (no-op schedules excluded).
    pub context_switches: u64,
    /// Threads spawned over the scheduler's lifetime.
    pub spawns: u64,
    /// Threads currently waiting in the run queue.
    pub runnable_queued: usize,
    /// Registry slots currently in use (any state, including dead
    /// not-yet-joined threads).
    pub live_threads: usize,
}

/// Per-OS-thread scheduling state.
struct Scheduler {
    registry: Registry,
    run_queue: RunQueue,
    /// Running thread id; `None` while the main stream executes.
    current: Option<Tid>,
    /// Whether the main stream is the active execution.
    running_main: bool,
    /// Saved context of the main stream; lives outside the registry.
    main_context: Context,
    /// Reentrancy guard for the [`yield_all`] barrier.
    yield_all_active: bool,
    switch_flags: SwitchFlags,
    default_stack_size: usize,
    context_switches: u64,
    spawns: u64,
    /// Panic caught on a spawned thread's stack, re-raised by the next
    /// execution that resumes so it ultimately unwinds on the main stream.
    pending_panic: Option<Box<dyn Any + Send>>,
    initialized: bool,
}

impl Scheduler {
    fn new() -> Self {
        Scheduler {
            registry: Registry::new(),
            run_queue: RunQueue::new(),
            current: None,
            running_main: true,
            main_context: Context::new(),
            yield_all_active: false,
            switch_flags: SwitchFlags::default(),
            default_stack_size: DEFAULT_STACK_SIZE,
            context_switches: 0,
            spawns: 0,
            pending_panic: None,
            initialized: false,
        }
    }

    fn ensure_init(&mut self) {
        if !self.initialized {
            self.initialized = true;
            log::debug!("scheduler initialized (defaults)");
        }
    }

    fn thread(&self, tid: Tid) -> &Thread {
        match self.registry.get(tid) {
            Some(thread) => thread,
            None => fatal!("no descriptor for thread {tid}"),
        }
    }

    fn thread_mut(&mut self, tid: Tid) -> &mut Thread {
        match self.registry.get_mut(tid) {
            Some(thread) => thread,
            None => fatal!("no descriptor for thread {tid}"),
        }
    }

    /// Context slot for an execution: the registry descriptor, or the
    /// dedicated main context for the main pseudo-thread.
    fn context_slot(&mut self, who: Option<Tid>) -> *mut Context {
        match who {
            None => &mut self.main_context as *mut Context,
            Some(tid) => self.thread_mut(tid).context_ptr(),
        }
    }

    /// Move a blocked thread back to eligibility, at the queue tail.
    fn make_runnable(&mut self, tid: Tid) {
        self.thread_mut(tid).set_state(ThreadState::Runnable);
        self.run_queue.push(tid);
    }
}

thread_local! {
    static SCHEDULER: UnsafeCell<Scheduler> = UnsafeCell::new(Scheduler::new());
}

/// Raw pointer to this OS thread's scheduler. Callers scope every borrow
/// derived from it strictly between context transfers.
fn scheduler() -> *mut Scheduler {
    SCHEDULER.with(|cell| cell.get())
}

/// Idempotent scheduler setup with default configuration.
///
/// Every entry point performs this lazily, so calling it is never required,
/// only explicit.
pub fn init() {
    let s = scheduler();
    unsafe { (*s).ensure_init() };
}

/// Idempotent scheduler setup with explicit configuration.
///
/// Configuration is applied once; if the scheduler already initialized
/// (explicitly or lazily), the call logs a warning and changes nothing.
pub fn init_with(config: RuntimeConfig) {
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        if sched.initialized {
            log::warn!("scheduler already initialized; configuration ignored");
            return;
        }
        sched.default_stack_size = config.stack_size.max(MIN_STACK_SIZE);
        sched.switch_flags = config.switch_flags;
        sched.initialized = true;
        log::debug!(
            "scheduler initialized (stack {} bytes, flags {:?})",
            sched.default_stack_size,
            sched.switch_flags,
        );
    }
}

/// Pick the next execution and transfer control to it.
///
/// The head of the run queue wins; with an empty queue, control falls back
/// to the main stream, and if the main stream is already executing the call
/// is a no-op. Every invocation is well-defined: there is no error path for
/// "nothing to run".
///
/// When this returns, the caller has simply been resumed; the selection
/// logic does not run a second time on the way back.
pub fn schedule() {
    let s = scheduler();
    let save;
    let resume;
    let flags;
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        let prev = sched.current;
        match sched.run_queue.pop() {
            Some(next) => {
                sched.current = Some(next);
                sched.running_main = false;
            }
            None => {
                if sched.running_main {
                    // Nothing else to run and the caller is already where
                    // it should be.
                    return;
                }
                // Last runnable spawned thread yielding to an idle system:
                // hand control back to the main stream.
                sched.running_main = true;
                sched.current = None;
            }
        }

        log::trace!("switching {prev:?} -> {:?}", sched.current);
        sched.context_switches += 1;
        save = sched.context_slot(prev);
        resume = sched.context_slot(sched.current) as *const Context;
        flags = sched.switch_flags;
    }

    // Control leaves this execution here and comes back only when someone
    // swaps into `save` again.
    unsafe { Context::swap(save, resume, flags) };

    let pending = unsafe { (*scheduler()).pending_panic.take() };
    if let Some(payload) = pending {
        resume_unwind(payload);
    }
}

/// Stop executing the calling thread and record it as `state`.
///
/// The descriptor keeps the thread's saved context; when another component
/// later makes this thread current again, the call simply returns. `Dead`
/// is the terminal transition: the thread's joiner (if any) is woken and
/// the call never returns.
///
/// Fatal when invoked from the main stream, which owns no descriptor to
/// suspend into.
pub fn suspend(state: ThreadState) {
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        let tid = match sched.current {
            Some(tid) => tid,
            None => fatal!("cannot suspend the main execution stream"),
        };
        debug_assert!(
            transition_allowed(sched.thread(tid).state(), state),
            "thread {tid}: invalid transition {} -> {state}",
            sched.thread(tid).state(),
        );
        log::debug!("thread {tid} suspending as {state}");
        sched.thread_mut(tid).set_state(state);

        if state.is_dead() {
            if let Some(joiner) = sched.thread_mut(tid).take_joiner() {
                sched.make_runnable(joiner);
            }
        }
    }
    schedule();
}

/// Make a blocked thread runnable and enqueue it.
///
/// The single re-entry point to eligibility: every synchronization
/// primitive whose condition is satisfied (unlock, signal, timer, I/O
/// readiness) routes the wake through here. Fatal on an invalid id, on a
/// dead thread, and on a thread that is already runnable (queued or
/// executing).
pub fn unsuspend(tid: Tid) {
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        if !sched.registry.is_valid(tid) {
            fatal!("unsuspend of invalid thread id {tid}");
        }
        match sched.thread(tid).state() {
            ThreadState::Dead => fatal!("unsuspend of dead thread {tid}"),
            ThreadState::Runnable => fatal!("unsuspend of runnable thread {tid}"),
            ThreadState::Blocked => sched.make_runnable(tid),
        }
        log::debug!("thread {tid} unsuspended");
    }
}

/// Give every queued thread one turn before the caller runs again.
///
/// From a spawned thread: re-enqueue at the tail and suspend, still
/// runnable. From the main stream (which cannot re-queue itself): run the
/// queue once and report [`YieldOutcome::NothingToDo`]. With an empty
/// queue, yielding is pointless and nothing happens at all.
pub fn yield_now() -> YieldOutcome {
    let s = scheduler();
    let me = unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        if sched.run_queue.is_empty() {
            return YieldOutcome::NothingToDo;
        }
        if let Some(tid) = sched.current {
            sched.run_queue.push(tid);
        }
        sched.current
    };

    match me {
        Some(_) => {
            suspend(ThreadState::Runnable);
            YieldOutcome::Yielded
        }
        None => {
            schedule();
            YieldOutcome::NothingToDo
        }
    }
}

/// Yield until the run queue is empty: a barrier that lets every other
/// runnable thread make progress before the caller proceeds.
///
/// The caller is not on the queue while executing, so once the queue
/// drains, every other thread is dead, blocked, or waiting on the caller.
/// Only one such barrier may be in flight: two threads each waiting for
/// "everyone else" would wait for each other, so a nested call is a fatal
/// deadlock. The guard clears on return regardless of how much yielding
/// was needed.
pub fn yield_all() {
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();
        if sched.yield_all_active {
            fatal!("deadlock: two threads yielding until idle");
        }
        sched.yield_all_active = true;
    }

    loop {
        let drained = unsafe { (*s).run_queue.is_empty() };
        if drained {
            break;
        }
        yield_now();
    }

    unsafe { (*s).yield_all_active = false };
}

/// Spawn a thread with the configured default stack size.
///
/// The thread starts runnable and queued; the caller keeps executing. The
/// returned id stays valid until [`join`] reaps it.
pub fn spawn<F>(name: &str, f: F) -> Tid
where
    F: FnOnce() + 'static,
{
    let size = unsafe {
        let sched = &mut *scheduler();
        sched.ensure_init();
        sched.default_stack_size
    };
    spawn_with_stack(name, f, size)
}

/// Spawn a thread on a stack of `stack_size` bytes (rounded up to
/// [`MIN_STACK_SIZE`]).
pub fn spawn_with_stack<F>(name: &str, f: F, stack_size: usize) -> Tid
where
    F: FnOnce() + 'static,
{
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        let tid = sched.registry.allocate();
        let arg = Box::into_raw(Box::new(f)) as u64;
        let thread = Thread::new(
            tid,
            name,
            stack_size.max(MIN_STACK_SIZE),
            thread_main::<F> as usize,
            arg,
        );
        sched.registry.install(tid, thread);
        sched.run_queue.push(tid);
        sched.spawns += 1;
        log::debug!("spawned thread {tid} ({name})");
        tid
    }
}

/// Every spawned thread enters here, with the boxed closure as `arg`.
///
/// Runs the closure, stashes any panic for the next resumed execution to
/// re-raise, wakes a pending joiner, and makes the terminal transition.
extern "C" fn thread_main<F>(arg: u64)
where
    F: FnOnce() + 'static,
{
    let f = unsafe { Box::from_raw(arg as usize as *mut F) };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let s = scheduler();
        unsafe {
            let sched = &mut *s;
            log::error!(
                "thread {:?} panicked; forwarding to the resuming execution",
                sched.current,
            );
            if sched.pending_panic.is_none() {
                sched.pending_panic = Some(payload);
            }
        }
    }
    suspend(ThreadState::Dead);
    unreachable!("dead thread was resumed");
}

/// Wait for `tid` to die, then reap its slot (stack and id included).
///
/// From a spawned thread this blocks; from the main stream it drives the
/// scheduler until the target dies. Fatal on an invalid id, on self-join,
/// on a second simultaneous joiner, and when the main stream would wait
/// forever because nothing is runnable.
pub fn join(tid: Tid) {
    enum Wait {
        Done,
        Block,
        DriveMain,
    }

    let s = scheduler();
    let wait = unsafe {
        let sched = &mut *s;
        sched.ensure_init();

        if !sched.registry.is_valid(tid) {
            fatal!("join of invalid thread id {tid}");
        }
        let me = sched.current;
        if me == Some(tid) {
            fatal!("thread {tid} joining itself");
        }
        if sched.thread(tid).state().is_dead() {
            Wait::Done
        } else {
            match me {
                Some(my_tid) => {
                    if sched.thread(tid).joiner().is_some() {
                        fatal!("thread {tid} already has a joiner");
                    }
                    sched.thread_mut(tid).set_joiner(my_tid);
                    Wait::Block
                }
                None => Wait::DriveMain,
            }
        }
    };

    match wait {
        Wait::Done => {}
        Wait::Block => {
            suspend(ThreadState::Blocked);
            debug_assert!(unsafe { (*s).thread(tid).state().is_dead() });
        }
        Wait::DriveMain => loop {
            let done = unsafe {
                let sched = &mut *s;
                if sched.thread(tid).state().is_dead() {
                    true
                } else if sched.run_queue.is_empty() {
                    fatal!("deadlock: joining thread {tid} with nothing runnable");
                } else {
                    false
                }
            };
            if done {
                break;
            }
            schedule();
        },
    }

    unsafe {
        let sched = &mut *s;
        match sched.registry.release(tid) {
            Some(thread) => log::debug!("reaped thread {} ({})", thread.id(), thread.name()),
            None => fatal!("thread {tid} vanished before it could be reaped"),
        }
    }
}

/// Id of the calling thread, or `None` for the main stream.
pub fn current() -> Option<Tid> {
    let s = scheduler();
    unsafe {
        (*s).ensure_init();
        (*s).current
    }
}

/// Snapshot of the observation counters.
pub fn stats() -> SchedStats {
    let s = scheduler();
    unsafe {
        let sched = &mut *s;
        sched.ensure_init();
        SchedStats {
            context_switches: sched.context_switches,
            spawns: sched.spawns,
            runnable_queued: sched.run_queue.len(),
            live_threads: sched.registry.live(),
        }
    }
}

/// Whether nothing is waiting in the run queue. Used by primitives that
/// must decide between driving the scheduler and declaring deadlock.
pub(crate) fn run_queue_empty() -> bool {
    let s = scheduler();
    unsafe {
        (*s).ensure_init();
        (*s).run_queue.is_empty()
    }
}
