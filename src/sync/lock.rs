//! Mutual-exclusion lock with priority donation, grounded in
//! `threads/synch.c`'s `lock_acquire`/`lock_release` and the donation walk
//! `priority_donation` performs while a thread is blocked waiting for a
//! lock.
//!
//! This is the one module in the crate that holds raw pointers
//! (`NonNull<Thread>`/`NonNull<Lock>`) instead of owned references. The
//! donation walk needs to reach into an arbitrary thread that is not
//! necessarily the one currently scheduled — exactly the access pattern
//! Pintos expresses with `struct thread *`/`struct lock *` — and there is
//! no way to express "mutate a thread owned by some other data structure,
//! possibly several hops away, without moving it" using safe borrows. The
//! safety invariant: every pointer stored here refers to a `Thread` or
//! `Lock` that is either the scheduler's `current`, sitting in a wait
//! queue, or a `Lock` embedded in caller-owned storage outliving the
//! donation — never a value that can be dropped while a pointer to it is
//! still reachable through `wait_on_lock`/`holder`/`held_locks`.

use crate::arch::Arch;
use crate::config::DONATION_DEPTH_CAP;
use crate::sched::Scheduler;
use crate::sync::semaphore::Semaphore;
use crate::thread::Thread;
use core::ptr::NonNull;

pub struct Lock {
    pub holder: Option<NonNull<Thread>>,
    sema: Semaphore,
}

impl Lock {
    pub const fn new() -> Self {
        Lock { holder: None, sema: Semaphore::new(1) }
    }

    pub fn is_held_by_current<A: Arch>(&self, sched: &Scheduler<A>) -> bool {
        self.holder
            .map(|h| unsafe { h.as_ref() }.tid == sched.current_tid())
            .unwrap_or(false)
    }

    /// Acquire the lock, donating the current thread's priority up the
    /// chain of lock holders if it is already held by a lower-priority
    /// thread. Grounded in `lock_acquire`.
    pub fn acquire<A: Arch>(&mut self, sched: &mut Scheduler<A>) {
        debug_assert!(!self.is_held_by_current(sched), "lock is not recursive");
        let _guard = A::disable_interrupts();

        if self.holder.is_some() && sched.policy_is_priority() {
            sched.donate_for_lock(NonNull::from(&*self), DONATION_DEPTH_CAP);
        }

        self.sema.down(sched);
        sched.clear_wait_on_lock();
        self.holder = Some(sched.current_thread_ptr());
        sched.record_lock_held(NonNull::from(&*self));
    }

    /// Claim the lock only if it is free right now; never donates.
    /// Grounded in `lock_try_acquire`.
    pub fn try_acquire<A: Arch>(&mut self, sched: &mut Scheduler<A>) -> bool {
        let _guard = A::disable_interrupts();
        if self.sema.try_down() {
            self.holder = Some(sched.current_thread_ptr());
            sched.record_lock_held(NonNull::from(&*self));
            true
        } else {
            false
        }
    }

    /// Release the lock, drop any donations this lock was responsible
    /// for, and recompute the releasing thread's effective priority from
    /// whatever donations remain (from other held locks). Grounded in
    /// `lock_release`'s call into `refresh_priority`.
    pub fn release<A: Arch>(&mut self, sched: &mut Scheduler<A>) {
        debug_assert!(self.is_held_by_current(sched));
        let _guard = A::disable_interrupts();
        self.holder = None;
        sched.release_lock_held(NonNull::from(&*self));
        self.sema.up(sched);
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}
