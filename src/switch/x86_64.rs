//! x86_64 machine-context save and restore.
//!
//! Only the System V AMD64 callee-saved state is tracked: RSP, RBP, RBX and
//! R12-R15. Everything caller-saved is already on the stack by the time the
//! switch routine runs, so a seven-register save is enough to resume a
//! cooperative thread. The full variant additionally carries MXCSR and the
//! x87 control word, the two pieces of floating-point state the ABI expects
//! a call to preserve.

use core::arch::naked_asm;
use core::ptr;

/// Callee-saved register file, in the exact order the assembly expects.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct MachineContext {
    /// Stack pointer
    rsp: u64, // 0x00
    /// Frame pointer
    rbp: u64, // 0x08
    rbx: u64, // 0x10
    r12: u64, // 0x18
    r13: u64, // 0x20
    r14: u64, // 0x28
    r15: u64, // 0x30
    /// SSE control/status, saved by the full switch only
    mxcsr: u32, // 0x38
    /// x87 control word, saved by the full switch only
    fpcw: u16, // 0x3c
    _pad: u16, // 0x3e
}

/// Power-on defaults for the FP control registers; a freshly seeded context
/// must hold restorable values even if it is first entered in full mode.
const MXCSR_INIT: u32 = 0x1f80;
const FPCW_INIT: u16 = 0x037f;

impl MachineContext {
    pub(super) fn zeroed() -> Self {
        MachineContext {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: MXCSR_INIT,
            fpcw: FPCW_INIT,
            _pad: 0,
        }
    }

    /// Seed a context so the first switch into it enters `entry` with `arg`
    /// as its only argument.
    ///
    /// The ABI wants RSP congruent to 16n+8 at function entry (as if a
    /// `call` just pushed a return address). `thread_start` is entered by
    /// `ret`, so the seeded stack holds its address at an aligned-minus-16
    /// slot: after the pop, RSP lands on 16n+8 and stays that way when the
    /// shim jumps on to `entry`.
    pub(super) fn with_entry(stack_top: usize, entry: usize, arg: u64) -> Self {
        let aligned = stack_top & !0xf;
        let initial_rsp = aligned - 16;
        unsafe {
            ptr::write(initial_rsp as *mut u64, thread_start as usize as u64);
        }
        MachineContext {
            rsp: initial_rsp as u64,
            r12: arg,
            r13: entry as u64,
            ..Self::zeroed()
        }
    }
}

/// First instructions a spawned thread ever runs.
///
/// The seeding above parks the closure pointer in R12 and the real entry
/// point in R13, both callee-saved and therefore intact after the restore
/// half of the switch. Moving the argument into RDI here, in assembly,
/// avoids any dependence on what a compiled prologue does to R12.
#[unsafe(naked)]
extern "C" fn thread_start() {
    naked_asm!("mov rdi, r12", "jmp r13");
}

/// Save the caller into `save` and resume `resume`, skipping all
/// floating-point state.
///
/// Returns only when some later switch restores `save`.
///
/// # Safety
/// Both pointers must be valid; `resume` must hold either seeded or
/// previously saved state.
#[unsafe(naked)]
pub(super) extern "C" fn switch_light(_save: *mut MachineContext, _resume: *const MachineContext) {
    naked_asm!(
        // Store the callee-saved file into *save (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        // Load the file from *resume (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        // Pops the resumed thread's return address: either its own switch
        // call site or the thread_start shim of a fresh context.
        "ret",
    );
}

/// Same as [`switch_light`] plus the FP control state the ABI marks
/// callee-saved (MXCSR control bits, x87 control word).
///
/// # Safety
/// Same contract as [`switch_light`].
#[unsafe(naked)]
pub(super) extern "C" fn switch_full(_save: *mut MachineContext, _resume: *const MachineContext) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr [rdi + 0x38]",
        "fnstcw [rdi + 0x3c]",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr [rsi + 0x38]",
        "fldcw [rsi + 0x3c]",
        "ret",
    );
}
