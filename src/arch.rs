//! Architectural boundary: the one place the scheduler reaches into raw
//! machine state. Everything above this trait is portable; everything
//! below it is `#[cfg(target_arch = "x86_64")]` naked assembly.
//!
//! Grounded in `atomic_os::scheduler::context`: callee-saved registers on
//! the System V ABI, a fake-return-address trick to seed a fresh stack, and
//! a naked `switch_context`/`restore_context` pair. Priority donation lives
//! one level up in `sync::lock`; this module only concerns itself with
//! saving/restoring CPU state.

/// Saved callee-saved register set for one kernel stack.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    /// Not part of the real callee-saved set; piggybacked here so a
    /// thread's first resume can arrive with its start argument already in
    /// `rdi`, the way the System V ABI expects a function's first
    /// argument. Meaningless once a thread has run at least once.
    pub rdi_seed: u64,
}

impl Context {
    /// An empty context, used for the thread that represents the code
    /// already running when the scheduler is brought up (it has no saved
    /// state to restore into — it simply keeps running).
    pub const fn empty() -> Self {
        Context { rsp: 0, rbp: 0, rbx: 0, r12: 0, r13: 0, r14: 0, r15: 0, rip: 0, rdi_seed: 0 }
    }

    /// A fresh context for a thread that has never run: `entry` becomes the
    /// instruction pointer, `stack_top` the (16-byte-aligned) initial
    /// stack, and `arg` is delivered in `rdi` on first resume.
    pub fn fresh(entry: u64, stack_top: u64, arg: u64) -> Self {
        let aligned_sp = (stack_top - 8) & !0xF;
        Context { rsp: aligned_sp, rip: entry, rdi_seed: arg, ..Context::empty() }
    }
}

/// The architectural boundary the scheduler is generic over. An outer
/// kernel binary provides the real x86_64 implementation (interrupt
/// masking, the naked `switch`/`restore` trampolines); tests use
/// [`mock::MockArch`]. Kernel stacks themselves are plain boxed byte
/// arrays owned by `Thread` (see `thread::KERNEL_STACK_SIZE`) rather than
/// something this trait allocates — a stack is just memory, not a
/// hardware resource.
pub trait Arch {
    /// RAII token proving interrupts are disabled. Must not be `Send`/`Sync`
    /// so it cannot outlive the stack frame that created it, and must
    /// restore the prior interrupt state on `Drop`. This is the concrete
    /// form of the "interrupts disabled" discipline that substitutes for
    /// general synchronization on a single CPU.
    type InterruptGuard;

    fn disable_interrupts() -> Self::InterruptGuard;

    /// True when called from interrupt (not thread) context. `sleep`,
    /// `block`, and the blocking sync operations assert this is false.
    fn in_interrupt_context() -> bool;

    /// Save the caller's register state into `*old`, then restore `*new`
    /// and resume execution there. Returns (via the ordinary function
    /// return path) once some other thread switches back to `old`.
    ///
    /// # Safety
    /// Both pointers must reference live, properly initialized contexts
    /// whose stacks remain valid for as long as any thread might switch
    /// back into them.
    unsafe fn switch(old: *mut Context, new: *const Context);

    /// Like [`Arch::switch`] but never saves the caller's state, because the
    /// caller (the thread currently running) is dying and its stack will
    /// never be resumed.
    ///
    /// # Safety
    /// `new` must reference a live, properly initialized context.
    unsafe fn restore(new: *const Context) -> !;
}

#[cfg(target_arch = "x86_64")]
pub mod x86 {
    use super::Context;
    use core::arch::naked_asm;

    /// Real x86_64 architectural implementation. An outer kernel binds this
    /// to [`super::Arch`] after supplying its own raw kernel-stack source
    /// (the frame allocator is out of this crate's scope).
    pub struct X86Arch;

    /// # Safety
    /// See [`super::Arch::switch`].
    #[unsafe(naked)]
    pub unsafe extern "C" fn switch_context(old: *mut Context, new: *const Context) {
        naked_asm!(
            "mov [rdi + 0x00], rsp",
            "mov [rdi + 0x08], rbp",
            "mov [rdi + 0x10], rbx",
            "mov [rdi + 0x18], r12",
            "mov [rdi + 0x20], r13",
            "mov [rdi + 0x28], r14",
            "mov [rdi + 0x30], r15",
            "lea rax, [rip + 2f]",
            "mov [rdi + 0x38], rax",
            "mov rsp, [rsi + 0x00]",
            "mov rbp, [rsi + 0x08]",
            "mov rbx, [rsi + 0x10]",
            "mov r12, [rsi + 0x18]",
            "mov r13, [rsi + 0x20]",
            "mov r14, [rsi + 0x28]",
            "mov r15, [rsi + 0x30]",
            "mov rdi, [rsi + 0x40]",
            "jmp [rsi + 0x38]",
            "2:",
            "ret",
        );
    }

    /// # Safety
    /// See [`super::Arch::restore`].
    #[unsafe(naked)]
    pub unsafe extern "C" fn restore_context(new: *const Context) {
        naked_asm!(
            "mov rsp, [rdi + 0x00]",
            "mov rbp, [rdi + 0x08]",
            "mov rbx, [rdi + 0x10]",
            "mov r12, [rdi + 0x18]",
            "mov r13, [rdi + 0x20]",
            "mov r14, [rdi + 0x28]",
            "mov r15, [rdi + 0x30]",
            "mov rax, [rdi + 0x38]",
            "mov rdi, [rdi + 0x40]",
            "jmp rax",
        );
    }
}

#[cfg(test)]
pub mod mock {
    use super::Context;
    use core::sync::atomic::{AtomicUsize, Ordering};

    /// Host-only `Arch` used by unit and integration tests. It never
    /// actually switches registers — tests exercise scheduler/VM
    /// bookkeeping, not real thread execution, so `switch`/`restore` just
    /// count their calls for assertions that care.
    pub struct MockArch;

    pub struct MockGuard;

    static DEPTH: AtomicUsize = AtomicUsize::new(0);
    pub static SWITCH_COUNT: AtomicUsize = AtomicUsize::new(0);

    impl super::Arch for MockArch {
        type InterruptGuard = MockGuard;

        fn disable_interrupts() -> Self::InterruptGuard {
            DEPTH.fetch_add(1, Ordering::SeqCst);
            MockGuard
        }

        fn in_interrupt_context() -> bool {
            false
        }

        unsafe fn switch(_old: *mut Context, _new: *const Context) {
            SWITCH_COUNT.fetch_add(1, Ordering::SeqCst);
        }

        unsafe fn restore(_new: *const Context) -> ! {
            SWITCH_COUNT.fetch_add(1, Ordering::SeqCst);
            loop {}
        }
    }

    impl Drop for MockGuard {
        fn drop(&mut self) {
            DEPTH.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
