//! Execution-context capture and swap.
//!
//! A [`Context`] is a snapshot of machine state (stack pointer, callee-saved
//! registers, return address) sufficient to resume a computation exactly
//! where it was captured. `Context::swap` saves the caller into one snapshot
//! and resumes another; control comes back through the original call site
//! only when a later swap restores the saved snapshot.
//!
//! By default the swap deliberately skips floating-point state and the
//! signal mask. Neither is needed for correct cooperative hand-over between
//! threads that treat every suspension point as a full call boundary, and
//! skipping them makes every switch materially cheaper (the signal mask in
//! particular costs a system call per transfer). [`SwitchFlags`] makes full
//! fidelity an explicit opt-in rather than a silent behavior change.

#[cfg(target_arch = "aarch64")]
#[path = "aarch64.rs"]
mod arch;
#[cfg(target_arch = "x86_64")]
#[path = "x86_64.rs"]
mod arch;

#[cfg(unix)]
use crate::fault::fatal;
use bitflags::bitflags;
use core::ptr;

bitflags! {
    /// Which state classes a context swap leaves out of the snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SwitchFlags: u32 {
        /// Skip floating-point registers and FP control state.
        const SKIP_FPU = 1 << 0;
        /// Skip the per-thread signal mask (saves a syscall per swap).
        const SKIP_SIGMASK = 1 << 1;
    }
}

impl Default for SwitchFlags {
    fn default() -> Self {
        SwitchFlags::SKIP_FPU | SwitchFlags::SKIP_SIGMASK
    }
}

/// Saved execution state for one logical thread.
pub struct Context {
    machine: arch::MachineContext,
    /// Captured only when the swap runs with `SKIP_SIGMASK` clear.
    #[cfg(unix)]
    sigmask: Option<libc::sigset_t>,
}

impl Context {
    /// An empty snapshot, valid as the save target of a first swap.
    pub fn new() -> Self {
        Context {
            machine: arch::MachineContext::zeroed(),
            #[cfg(unix)]
            sigmask: None,
        }
    }

    /// Seed a snapshot so the first swap into it calls `entry(arg)` on the
    /// stack ending at `stack_top`.
    ///
    /// `entry` must be an `extern "C" fn(u64)` address and must never
    /// return; `stack_top` must point one past writable stack memory that
    /// stays alive as long as the context does.
    pub(crate) fn with_entry(stack_top: usize, entry: usize, arg: u64) -> Self {
        Context {
            machine: arch::MachineContext::with_entry(stack_top, entry, arg),
            #[cfg(unix)]
            sigmask: None,
        }
    }

    /// Save the calling execution into `save` and resume `resume`.
    ///
    /// Returns (to the caller of this function) only when some later swap
    /// restores `save`. A signal-mask capture failure is unrecoverable: a
    /// half-restored execution cannot be safely continued.
    ///
    /// # Safety
    /// Both pointers must be valid and distinct. `resume` must hold seeded
    /// or previously saved state, and the stack it refers to must be live.
    /// The caller must not hold any borrow of scheduler state across the
    /// call: another logical thread runs before it returns.
    pub(crate) unsafe fn swap(save: *mut Context, resume: *const Context, flags: SwitchFlags) {
        #[cfg(unix)]
        if !flags.contains(SwitchFlags::SKIP_SIGMASK) {
            swap_sigmask(save, resume);
        }
        let save_machine = ptr::addr_of_mut!((*save).machine);
        let resume_machine = ptr::addr_of!((*resume).machine);
        if flags.contains(SwitchFlags::SKIP_FPU) {
            arch::switch_light(save_machine, resume_machine);
        } else {
            arch::switch_full(save_machine, resume_machine);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

/// Capture the caller's signal mask into `save` and install the mask
/// recorded in `resume`, if it has one. A fresh context has no recorded
/// mask and simply inherits the caller's.
#[cfg(unix)]
unsafe fn swap_sigmask(save: *mut Context, resume: *const Context) {
    let mut current = core::mem::MaybeUninit::<libc::sigset_t>::uninit();
    if libc::sigprocmask(libc::SIG_SETMASK, ptr::null(), current.as_mut_ptr()) != 0 {
        fatal!("could not capture the signal mask");
    }
    (*save).sigmask = Some(current.assume_init());
    if let Some(mask) = (*resume).sigmask.as_ref() {
        if libc::sigprocmask(libc::SIG_SETMASK, mask, ptr::null_mut()) != 0 {
            fatal!("could not restore a saved signal mask");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_skip_fpu_and_sigmask() {
        let flags = SwitchFlags::default();
        assert!(flags.contains(SwitchFlags::SKIP_FPU));
        assert!(flags.contains(SwitchFlags::SKIP_SIGMASK));
    }

    #[test]
    fn fresh_context_has_no_captured_sigmask() {
        let ctx = Context::new();
        #[cfg(unix)]
        assert!(ctx.sigmask.is_none());
        let _ = ctx;
    }
}
