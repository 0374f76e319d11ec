//! Thread descriptor: identity, state, saved context, owned stack.

use super::state::ThreadState;
use super::Tid;
use crate::switch::Context;

/// One registry slot's worth of thread bookkeeping.
///
/// The descriptor owns the thread's stack buffer for the thread's whole
/// lifetime; the buffer is released only when the slot is reaped after the
/// thread is dead, so the saved context can never outlive the stack it
/// points into.
pub(crate) struct Thread {
    id: Tid,
    /// For diagnostics only; not required to be unique.
    name: Box<str>,
    state: ThreadState,
    /// Written when the thread suspends, read when it is resumed.
    context: Context,
    #[allow(dead_code)] // held only to keep the stack memory alive
    stack: Vec<u8>,
    /// Thread waiting in `join` for this one to die, if any.
    joiner: Option<Tid>,
}

impl Thread {
    /// Build a descriptor whose context enters `entry(arg)` on a fresh
    /// stack of `stack_size` bytes the first time it is scheduled.
    pub(crate) fn new(id: Tid, name: &str, stack_size: usize, entry: usize, arg: u64) -> Self {
        let mut stack = vec![0u8; stack_size];
        // Stacks grow downward; the context is seeded from the high end.
        let stack_top = stack.as_mut_ptr() as usize + stack.len();
        let context = Context::with_entry(stack_top, entry, arg);

        Thread {
            id,
            name: name.into(),
            state: ThreadState::Runnable,
            context,
            stack,
            joiner: None,
        }
    }

    pub(crate) fn id(&self) -> Tid {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    /// Pointer handed to the context swap; the descriptor must stay put in
    /// its slot while the swap reads or writes through it.
    pub(crate) fn context_ptr(&mut self) -> *mut Context {
        &mut self.context as *mut Context
    }

    pub(crate) fn joiner(&self) -> Option<Tid> {
        self.joiner
    }

    pub(crate) fn set_joiner(&mut self, joiner: Tid) {
        self.joiner = Some(joiner);
    }

    pub(crate) fn take_joiner(&mut self) -> Option<Tid> {
        self.joiner.take()
    }
}
