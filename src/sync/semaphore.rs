//! Counting semaphore, grounded in `threads/synch.c`'s `sema_down`/
//! `sema_up`. The waiter list is a plain `VecDeque<Box<Thread>>` owned by
//! the semaphore itself rather than an intrusive `list_elem` threaded
//! through a global thread table, which is what lets a blocked thread's
//! `Box` simply move from the scheduler into the semaphore and back.

use crate::arch::Arch;
use crate::sched::Scheduler;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::cmp::Reverse;

pub struct Semaphore {
    value: usize,
    waiters: VecDeque<Box<crate::thread::Thread>>,
}

impl Semaphore {
    pub const fn new(value: usize) -> Self {
        Semaphore { value, waiters: VecDeque::new() }
    }

    pub fn value(&self) -> usize {
        self.value
    }

    /// Block the current thread until `value > 0`, then claim one unit.
    /// Grounded in `sema_down`'s `while (sema->value == 0)` loop: the
    /// recheck after waking guards against another thread having grabbed
    /// the unit first.
    pub fn down<A: Arch>(&mut self, sched: &mut Scheduler<A>) {
        let _guard = A::disable_interrupts();
        while self.value == 0 {
            let waiters = &mut self.waiters;
            sched.block_current_into(|t| waiters.push_back(t));
        }
        self.value -= 1;
    }

    /// Non-blocking variant: claims a unit only if one is immediately
    /// available. Grounded in `sema_try_down`.
    pub fn try_down(&mut self) -> bool {
        if self.value > 0 {
            self.value -= 1;
            true
        } else {
            false
        }
    }

    /// Release one unit and, if any thread is waiting, wake the
    /// highest-priority one. Grounded in `sema_up`'s priority-ordered
    /// wakeup (the teacher's own `synch.c` variant sorts waiters by
    /// priority before popping, rather than always waking the head of a
    /// FIFO list).
    pub fn up<A: Arch>(&mut self, sched: &mut Scheduler<A>) {
        let _guard = A::disable_interrupts();
        if let Some(idx) = self
            .waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| (t.priority, Reverse(t.tid.0)))
            .map(|(i, _)| i)
        {
            let woken = self.waiters.remove(idx).expect("index from enumerate is valid");
            sched.unblock(woken);
        }
        self.value += 1;
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Highest priority among currently blocked waiters, if any. Used by
    /// [`crate::sync::condvar::Condvar`] to pick which private per-waiter
    /// semaphore to signal.
    pub fn peek_top_priority(&self) -> Option<u8> {
        self.waiters.iter().map(|t| t.priority).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{Policy, Scheduler};
    use crate::thread::{Thread, Tid};
    use alloc::string::String;

    #[test]
    fn try_down_only_succeeds_while_a_unit_is_available() {
        let mut sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert_eq!(sem.value(), 0);
        assert!(!sem.try_down());
    }

    #[test]
    fn peek_top_priority_reports_the_highest_waiting_thread() {
        let mut sem = Semaphore::new(0);
        sem.waiters.push_back(Thread::new(Tid(1), String::from("a"), 10));
        sem.waiters.push_back(Thread::new(Tid(2), String::from("b"), 30));
        sem.waiters.push_back(Thread::new(Tid(3), String::from("c"), 20));
        assert_eq!(sem.peek_top_priority(), Some(30));
        assert_eq!(sem.waiter_count(), 3);
    }

    #[test]
    fn up_wakes_the_highest_priority_waiter_first() {
        use crate::arch::mock::MockArch;
        let mut sched: Scheduler<MockArch> = Scheduler::new(Policy::Priority);
        let mut sem = Semaphore::new(0);
        sem.waiters.push_back(Thread::new(Tid(1), String::from("a"), 10));
        sem.waiters.push_back(Thread::new(Tid(2), String::from("b"), 30));
        sem.waiters.push_back(Thread::new(Tid(3), String::from("c"), 20));

        sem.up(&mut sched);

        assert_eq!(sem.value(), 1);
        assert_eq!(sem.waiter_count(), 2);
        assert!(!sem.waiters.iter().any(|t| t.tid == Tid(2)), "the highest-priority waiter must be the one woken");
    }
}
