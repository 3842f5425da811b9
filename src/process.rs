//! Operations that need both a [`Scheduler`] and a [`VirtualMemory`] at
//! once. Kept out of both modules so neither has to know the other
//! exists; today that's only `fork`.
//!
//! Grounded in `atomic_os::scheduler::sys_fork`, which likewise creates
//! the child thread first and then deep-copies the parent's memory into
//! it before making the child schedulable.

use crate::arch::Arch;
use crate::sched::{Disposition, Scheduler};
use crate::thread::Tid;
use crate::vm::{VirtualMemory, VmError, VmPlatform};

/// Fork the current thread: create a child thread ready to run at
/// `entry`/`arg`, carrying a copy-on-fork duplicate of the current
/// thread's address space. Returns the child's tid.
///
/// `entry`/`arg` seed the child's first resume the same way
/// [`Scheduler::spawn`]'s do; reconstructing a trap frame so a forked
/// *user* thread resumes past its `fork()` call with a zero return value
/// is a syscall-gate concern this crate doesn't model (see the external
/// interfaces notes on register-passing conventions), so that trampoline
/// is supplied by the caller.
pub fn fork<A: Arch, P: VmPlatform>(
    sched: &mut Scheduler<A>,
    vm: &mut VirtualMemory<P>,
    child_mmu: P::Mmu,
    name: &str,
    entry: u64,
    arg: u64,
) -> Result<Tid, VmError> {
    let parent = sched.current_tid();
    let child = sched.fork_child(name, entry, arg);
    vm.fork_address_space(parent, child, child_mmu)?;
    Ok(child)
}

/// Tear down the current thread: tear down its address space (writing
/// back dirty FILE pages, freeing frames and swap), then route it off the
/// CPU through `Scheduler::reschedule(Disposition::Exit)`. Grounded in
/// `process_exit`, which tears down the page directory before handing off
/// to `thread_exit` — the same ordering `fork` mirrors in reverse.
pub fn exit<A: Arch, P: VmPlatform>(sched: &mut Scheduler<A>, vm: &mut VirtualMemory<P>, status: i32) {
    let pid = sched.current_tid();
    vm.destroy_address_space(pid);
    sched.reschedule(Disposition::Exit(status));
}
