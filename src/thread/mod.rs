//! Thread control blocks and the states a thread moves through.
//!
//! Grounded in `threads/thread.h`/`thread.c`: the `struct thread` fields
//! (`status`, `priority`, `nice`, `recent_cpu`, the donation bookkeeping)
//! carry over almost one-for-one. What changes is the storage discipline:
//! Pintos threads are allocated once on a dedicated page and referenced
//! everywhere by raw `struct thread *`; here every thread is a `Box<Thread>`
//! so its heap address is stable for the lifetime of the box, and queues
//! move the box by value instead of splicing an intrusive `list_elem`.

use crate::arch::Context;
use crate::config::{NICE_DEFAULT, PRI_DEFAULT};
use crate::sync::lock::Lock;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;
use spin::Mutex;

/// Size of the kernel-mode stack given to every thread, grounded in
/// `atomic_os::scheduler::task`'s boxed `_kernel_stack` field.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Sentinel stamped into every `Thread` at construction, in the spirit of
/// the original `is_thread()` check against stack overflow clobbering the
/// control block. This crate doesn't itself allocate the raw kernel-stack
/// pages `magic` used to sit at the foot of, but the field and the check
/// are kept so an outer kernel wiring up real stacks can still validate it.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Thread identifier, unique for the lifetime of the scheduler (never
/// reused), assigned in creation order. Doubles as the process id: this
/// core has no notion of a multi-threaded process, matching the spec's
/// explicit Non-goal on process/thread separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid({})", self.0)
    }
}

/// Coarse scheduling state. `Dying` is an intermediate state between
/// `exit` being called and the thread's stack actually being reclaimed by
/// the next thread to run, mirroring Pintos's `THREAD_DYING` and the
/// deferred free in `schedule()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Blocked,
    Sleeping,
    Dying,
}

/// Which queue (if any) currently owns this thread's `Box`. Used by the
/// scheduler to validate transitions and to know where to look when a
/// wakeup needs to pull a thread back out of wherever it's sitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadLocation {
    CurrentlyRunning,
    ReadyQueue,
    SleepQueue,
    WaitQueue,
    Nowhere,
}

#[derive(Debug)]
pub enum ThreadError {
    /// `set_priority`/`set_nice` received a value outside the configured
    /// range.
    OutOfRange,
    /// A blocking operation was attempted from interrupt context.
    WouldBlockInInterrupt,
    /// The target thread id does not exist (already exited, or never did).
    NoSuchThread,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::OutOfRange => write!(f, "value out of range"),
            ThreadError::WouldBlockInInterrupt => write!(f, "blocking call made from interrupt context"),
            ThreadError::NoSuchThread => write!(f, "no such thread"),
        }
    }
}

/// Handshake between a thread and whoever eventually waits on it. Built to
/// survive the parent or child's `Thread` being dropped first: the status
/// is stashed out-of-line in the shared `Arc`, and `exited` is a semaphore
/// rather than a one-shot flag so a `wait` issued after the child has
/// already exited still succeeds immediately (the up'd count persists).
pub struct ExitChannel {
    pub status: Mutex<Option<i32>>,
    pub exited: Mutex<crate::sync::semaphore::Semaphore>,
}

impl ExitChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(ExitChannel {
            status: Mutex::new(None),
            exited: Mutex::new(crate::sync::semaphore::Semaphore::new(0)),
        })
    }
}

/// A single thread control block.
///
/// `base_priority` is what `set_priority` changes directly; `priority` is
/// the effective priority used for scheduling decisions and is recomputed
/// by the donation walk in `sync::lock` whenever a donation is added or
/// removed. Under MLFQS, `priority` instead tracks `priority_calculator`'s
/// output and `set_priority` is rejected by the scheduler layer.
pub struct Thread {
    pub tid: Tid,
    pub name: String,
    pub state: ThreadState,
    pub location: ThreadLocation,
    /// Saved register state, restored by [`crate::arch::Arch::switch`] the
    /// next time this thread is scheduled.
    pub context: Context,

    pub base_priority: u8,
    pub priority: u8,
    /// Priorities donated to this thread, keyed by which lock the donor is
    /// blocked on, most recent push last. Keeping the lock identity (not
    /// just the donated amount) is what lets `lock_release` drop only the
    /// donations tied to the lock it's releasing rather than every
    /// donation the thread holds. `refresh_priority` recomputes `priority`
    /// as `max(base_priority, donations)` whenever this changes.
    pub donations: Vec<(NonNull<Lock>, u8)>,
    /// The lock this thread is blocked trying to acquire, if any. Drives
    /// the donation walk: the walk follows `wait_on_lock.holder` and stops
    /// when a thread isn't waiting on anything.
    pub wait_on_lock: Option<NonNull<Lock>>,
    /// Locks currently held, so `lock_release` can recompute `donations`
    /// from the locks that remain.
    pub held_locks: Vec<NonNull<Lock>>,

    /// Ticks the current quantum has consumed since this thread was last
    /// scheduled in; reset to 0 in `switch_to_next`. Grounded in the
    /// per-thread consumed-quantum counter `thread_tick` increments,
    /// distinct from the scheduler's global `ticks` clock.
    pub quantum_ticks: u64,

    magic: u32,

    /// MLFQS bookkeeping; unused under the strict-priority policy.
    pub nice: i32,
    pub recent_cpu: i32,

    /// Absolute tick at which a sleeping thread should be woken.
    pub wake_tick: u64,

    pub exit_channel: Arc<ExitChannel>,
    pub parent: Option<Tid>,
    pub children: BTreeMap<Tid, Arc<ExitChannel>>,

    /// `None` for the bootstrap thread that represents whatever was
    /// running before the scheduler took over; every other thread owns a
    /// dedicated kernel stack for its whole lifetime.
    _kernel_stack: Option<Box<[u8; KERNEL_STACK_SIZE]>>,
}

impl Thread {
    pub fn new(tid: Tid, name: String, priority: u8) -> Box<Self> {
        Box::new(Thread {
            tid,
            name,
            state: ThreadState::Blocked,
            location: ThreadLocation::Nowhere,
            context: Context::empty(),
            base_priority: priority,
            priority,
            donations: Vec::new(),
            wait_on_lock: None,
            held_locks: Vec::new(),
            quantum_ticks: 0,
            magic: THREAD_MAGIC,
            nice: NICE_DEFAULT,
            recent_cpu: 0,
            wake_tick: 0,
            exit_channel: ExitChannel::new(),
            parent: None,
            children: BTreeMap::new(),
            _kernel_stack: None,
        })
    }

    /// A runnable thread with its own kernel stack, ready to be seeded
    /// with a [`Context`] pointing at `entry`.
    pub fn spawn(tid: Tid, name: String, priority: u8, entry: u64, arg: u64) -> Box<Self> {
        let mut stack = Box::new([0u8; KERNEL_STACK_SIZE]);
        let top = (stack.as_mut_ptr() as u64) + KERNEL_STACK_SIZE as u64;
        let mut t = Thread::new(tid, name, priority);
        t.context = Context::fresh(entry, top, arg);
        t._kernel_stack = Some(stack);
        t
    }

    pub fn idle(tid: Tid) -> Box<Self> {
        Thread::new(tid, String::from("idle"), 0)
    }

    pub fn default_priority() -> u8 {
        PRI_DEFAULT
    }

    /// Recompute `priority` from `base_priority` and any outstanding
    /// donations. Grounded in `synch.c`'s `refresh_priority`.
    pub fn refresh_priority(&mut self) {
        self.priority = self
            .donations
            .iter()
            .map(|(_, p)| *p)
            .fold(self.base_priority, core::cmp::max);
    }

    /// Debug-only sanity check that this control block hasn't been
    /// clobbered by a kernel-stack overflow, in the spirit of the original
    /// `is_thread()`.
    pub fn check_magic(&self) {
        debug_assert_eq!(self.magic, THREAD_MAGIC, "thread control block corrupted (stack overflow?)");
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("base_priority", &self.base_priority)
            .finish()
    }
}

// SAFETY: a `Thread` is only ever reachable by an architectural pointer
// (`NonNull<Thread>`) while it is the scheduler's `current` thread on a
// single CPU, and all other access runs with interrupts disabled. The
// scheduler never hands out `&Thread`/`&mut Thread` across that boundary
// without synchronization.
unsafe impl Send for Thread {}
