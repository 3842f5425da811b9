//! Mesa-style condition variable, grounded in `threads/synch.c`'s
//! `cond_wait`/`cond_signal`/`cond_broadcast`.
//!
//! Pintos represents each waiter as a `semaphore_elem` (a private
//! one-shot semaphore) threaded onto the condition's own `list`, and
//! `cond_signal` wakes the waiter whose semaphore has the highest-priority
//! thread blocked on it. Here the private semaphores live in a
//! `BTreeMap` keyed by a monotonic ticket instead of an intrusive list,
//! so a waiter can find and remove exactly its own entry without needing
//! a pointer back into the condvar's storage.

use crate::arch::Arch;
use crate::sched::Scheduler;
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use alloc::collections::BTreeMap;

pub struct Condvar {
    waiters: BTreeMap<u64, Semaphore>,
    next_ticket: u64,
}

impl Condvar {
    pub const fn new() -> Self {
        Condvar { waiters: BTreeMap::new(), next_ticket: 0 }
    }

    /// Atomically release `lock` and block until signaled, then
    /// reacquire `lock` before returning. As with all Mesa-style condvars,
    /// the condition must be re-checked in a loop by the caller: a woken
    /// waiter is not guaranteed the condition still holds.
    pub fn wait<A: Arch>(&mut self, lock: &mut Lock, sched: &mut Scheduler<A>) {
        debug_assert!(lock.is_held_by_current(sched));
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.insert(ticket, Semaphore::new(0));

        lock.release(sched);
        self.waiters.get_mut(&ticket).expect("own ticket present").down(sched);
        lock.acquire(sched);
    }

    /// Wake the single highest-priority waiter, if any. Grounded in
    /// `cond_signal`. Removes the waiter's ticket immediately rather than
    /// waiting for the woken thread to run again and remove it itself —
    /// otherwise a `broadcast` whose caller outranks every waiter it wakes
    /// never observes `self.waiters` draining and spins forever.
    pub fn signal<A: Arch>(&mut self, lock: &Lock, sched: &mut Scheduler<A>) {
        debug_assert!(lock.is_held_by_current(sched));
        let _guard = A::disable_interrupts();
        if let Some(ticket) = self
            .waiters
            .iter()
            .filter_map(|(t, s)| s.peek_top_priority().map(|p| (p, *t)))
            .max_by_key(|(p, t)| (*p, *t))
            .map(|(_, t)| t)
        {
            let mut sem = self.waiters.remove(&ticket).expect("ticket just observed");
            sem.up(sched);
        }
    }

    /// Wake every waiter. Grounded in `cond_broadcast`.
    pub fn broadcast<A: Arch>(&mut self, lock: &Lock, sched: &mut Scheduler<A>) {
        while !self.waiters.is_empty() {
            self.signal(lock, sched);
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}
