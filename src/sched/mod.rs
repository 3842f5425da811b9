//! The scheduler: ready queue, sleep queue, priority/MLFQS policy, and the
//! single `reschedule` dispatch point every blocking or yielding operation
//! funnels through.
//!
//! Grounded in `threads/thread.c`'s `schedule`/`thread_yield`/`thread_block`/
//! `thread_tick`, reshaped around ownership: instead of a global
//! `all_list`/`ready_list` of intrusive `list_elem`s, the scheduler owns
//! every non-running thread as a `Box<Thread>` in a `VecDeque` or `Vec`,
//! and a thread moves between collections by value. A thread's heap
//! address — and so any raw pointer taken into it for lock donation — is
//! stable across such a move, since moving a `Box` only moves the pointer.

pub mod mlfqs;
pub mod policy;

use crate::arch::{Arch, Context};
use crate::config::{PRI_DEFAULT, TIME_SLICE, TIMER_FREQ};
use crate::sync::lock::Lock;
use crate::thread::{Thread, ThreadError, ThreadLocation, ThreadState, Tid};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr::NonNull;
pub use policy::Policy;

/// The reason a thread is leaving the CPU through the scheduler's public
/// entry points. Unifies `thread_yield`, `timer_sleep`, and `thread_exit`
/// behind one internal dispatch, mirroring how Pintos's `schedule()` is
/// the single place a `struct thread *` stops being `current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Yield,
    Sleep(u64),
    Exit(i32),
}

pub struct Scheduler<A: Arch> {
    ready_queue: VecDeque<Box<Thread>>,
    sleepers: Vec<Box<Thread>>,
    destruction: Vec<Box<Thread>>,
    current: Option<Box<Thread>>,
    next_tid: u64,
    policy: Policy,
    load_avg: mlfqs::Fp,
    ticks: u64,
    pending_yield: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch> Scheduler<A> {
    /// Bring up the scheduler with the calling context as the initial
    /// `current` thread (an empty `Context`, since it never needs to be
    /// switched *into* — only ever *out of*) and spawn the idle thread.
    /// Grounded in `thread_init`/`thread_start`.
    pub fn new(policy: Policy) -> Self {
        let mut sched = Scheduler {
            ready_queue: VecDeque::new(),
            sleepers: Vec::new(),
            destruction: Vec::new(),
            current: None,
            next_tid: 0,
            policy,
            load_avg: mlfqs::Fp::from_int(0),
            ticks: 0,
            pending_yield: false,
            _arch: PhantomData,
        };
        let main = Thread::new(Tid(0), String::from("main"), PRI_DEFAULT);
        sched.next_tid = 1;
        sched.current = Some(main);
        sched
    }

    fn alloc_tid(&mut self) -> Tid {
        let tid = Tid(self.next_tid);
        self.next_tid += 1;
        tid
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn policy_is_priority(&self) -> bool {
        self.policy == Policy::Priority
    }

    pub fn current_tid(&self) -> Tid {
        self.current.as_ref().expect("current thread always present").tid
    }

    pub fn current_priority(&self) -> u8 {
        self.current.as_ref().expect("current thread always present").priority
    }

    pub fn current_name(&self) -> &str {
        &self.current.as_ref().expect("current thread always present").name
    }

    pub fn current_thread_ptr(&mut self) -> NonNull<Thread> {
        NonNull::from(&mut **self.current.as_mut().expect("current thread always present"))
    }

    pub fn ready_len(&self) -> usize {
        self.ready_queue.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn load_avg_raw(&self) -> i32 {
        self.load_avg.raw()
    }

    // ---- thread creation -------------------------------------------------

    /// Create a new thread and make it ready to run. `entry`/`arg` seed its
    /// first resume per [`crate::arch::Context::fresh`]. Grounded in
    /// `thread_create`.
    pub fn spawn(&mut self, name: &str, priority: u8, entry: u64, arg: u64) -> Tid {
        let tid = self.alloc_tid();
        let mut t = Thread::spawn(tid, String::from(name), priority, entry, arg);
        t.nice = self.current.as_ref().map(|c| c.nice).unwrap_or(0);
        t.state = ThreadState::Ready;
        t.location = ThreadLocation::ReadyQueue;
        self.ready_queue.push_back(t);
        self.maybe_preempt();
        tid
    }

    /// Create a child thread of the current one: same priority and nice,
    /// its own exit channel registered with the parent so `wait` can find
    /// it, ready to run at `entry`/`arg`. Returns the child's tid.
    ///
    /// This only creates the thread-scheduling half of `fork`; duplicating
    /// the parent's address space is a virtual-memory concern handled by
    /// [`crate::vm::VirtualMemory::fork_address_space`] and tied together
    /// with this method in [`crate::process::fork`], where both a
    /// `Scheduler` and a `VirtualMemory` are in scope. Grounded in
    /// `atomic_os::scheduler::sys_fork`'s `thread_create`-then-duplicate
    /// shape.
    pub fn fork_child(&mut self, name: &str, entry: u64, arg: u64) -> Tid {
        let tid = self.alloc_tid();
        let parent = self.current.as_ref().expect("current thread always present");
        let (priority, nice, parent_tid) = (parent.priority, parent.nice, parent.tid);
        let mut t = Thread::spawn(tid, String::from(name), priority, entry, arg);
        t.nice = nice;
        t.parent = Some(parent_tid);
        t.state = ThreadState::Ready;
        t.location = ThreadLocation::ReadyQueue;
        let channel = t.exit_channel.clone();
        self.ready_queue.push_back(t);
        self.current
            .as_mut()
            .expect("current thread always present")
            .children
            .insert(tid, channel);
        self.maybe_preempt();
        tid
    }

    // ---- blocking primitives used by sync::{semaphore,lock,condvar} -----

    /// Remove the current thread from the CPU, hand it to `place` (which
    /// stores it in a wait queue the caller owns), and switch to the next
    /// ready thread. `place` runs after the thread's state is updated but
    /// before the context switch, so the thread is reachable in its new
    /// home before this function ever returns to resume someone else.
    pub fn block_current_into(&mut self, place: impl FnOnce(Box<Thread>)) {
        assert!(!A::in_interrupt_context(), "cannot block from interrupt context");
        let mut t = self.current.take().expect("current thread always present");
        t.state = ThreadState::Blocked;
        t.location = ThreadLocation::WaitQueue;
        let old_ctx: *mut Context = &mut t.context;
        place(t);
        self.switch_to_next(old_ctx);
    }

    /// Move a previously blocked thread back onto the ready queue,
    /// preempting the current thread immediately if the woken thread now
    /// outranks it. Grounded in `thread_unblock`.
    pub fn unblock(&mut self, mut t: Box<Thread>) {
        t.state = ThreadState::Ready;
        t.location = ThreadLocation::ReadyQueue;
        self.ready_queue.push_back(t);
        // `current` is briefly `None` while `reschedule` is mid-transition
        // (e.g. a dying thread upping its exit semaphore); nothing to
        // preempt in that window, and the pending switch already picks the
        // highest-priority ready thread.
        if self.current.is_some() {
            self.maybe_preempt();
        }
    }

    fn maybe_preempt(&mut self) {
        if A::in_interrupt_context() {
            self.pending_yield = self.should_preempt();
            return;
        }
        if self.should_preempt() {
            self.reschedule(Disposition::Yield);
        }
    }

    fn should_preempt(&self) -> bool {
        let current_pri = self.current.as_ref().map(|t| t.priority).unwrap_or(0);
        self.ready_queue.iter().any(|t| t.priority > current_pri)
    }

    // ---- lock donation support (see sync::lock) --------------------------

    pub fn record_lock_held(&mut self, lock: NonNull<Lock>) {
        self.current.as_mut().expect("current thread always present").held_locks.push(lock);
    }

    /// Clear the current thread's `wait_on_lock`. Called once a blocked
    /// `Lock::acquire` wakes and actually holds the lock, so a donation
    /// walk reaching this thread afterward doesn't mistake it for still
    /// being blocked. Grounded in `lock_acquire`'s donee-linkage reset once
    /// `sema_down` returns.
    pub fn clear_wait_on_lock(&mut self) {
        self.current.as_mut().expect("current thread always present").wait_on_lock = None;
    }

    /// Drop `lock` from the current thread's held-lock list, discard only
    /// the donations this lock's waiters contributed, and recompute the
    /// thread's effective priority from whatever donations remain (tied to
    /// other locks it still holds). Grounded in `lock_release`.
    pub fn release_lock_held(&mut self, lock: NonNull<Lock>) {
        let cur = self.current.as_mut().expect("current thread always present");
        cur.held_locks.retain(|l| *l != lock);
        cur.donations.retain(|(l, _)| *l != lock);
        cur.refresh_priority();
    }

    /// Walk the chain of lock holders starting at `lock`, donating the
    /// current thread's priority to each holder that is currently lower
    /// priority, up to `max_depth` hops. Grounded in `lock_acquire`'s call
    /// into the donation walk in `synch.c`.
    pub fn donate_for_lock(&mut self, lock: NonNull<Lock>, max_depth: u8) {
        let donor_priority = self.current_priority();
        let mut next_lock = Some(lock);
        let mut hops = 0u8;
        // SAFETY: every pointer reached here is either `current` or a
        // thread sitting in a wait queue this scheduler owns, per the
        // invariant documented on `sync::lock::Lock`.
        unsafe {
            self.current
                .as_mut()
                .expect("current thread always present")
                .wait_on_lock = next_lock;
            while let Some(lock_ptr) = next_lock {
                if hops >= max_depth {
                    break;
                }
                hops += 1;
                let lock_ref = lock_ptr.as_ref();
                let Some(mut holder) = lock_ref.holder else { break };
                let holder_mut = holder.as_mut();
                if holder_mut.priority >= donor_priority {
                    break;
                }
                holder_mut.donations.push((lock_ptr, donor_priority));
                holder_mut.refresh_priority();
                next_lock = holder_mut.wait_on_lock;
            }
        }
    }

    // ---- sleeping ---------------------------------------------------------

    /// Block the current thread until `ticks() >= wake_tick`. Grounded in
    /// `timer_sleep`'s cooperating thread-side half (the busy polling loop
    /// in the original is replaced by an explicit sleep queue woken from
    /// `tick`).
    pub fn sleep_until(&mut self, wake_tick: u64) {
        assert!(!A::in_interrupt_context(), "cannot sleep from interrupt context");
        if wake_tick <= self.ticks {
            return;
        }
        let mut t = self.current.take().expect("current thread always present");
        t.state = ThreadState::Sleeping;
        t.location = ThreadLocation::SleepQueue;
        t.wake_tick = wake_tick;
        let old_ctx: *mut Context = &mut t.context;
        self.sleepers.push(t);
        self.switch_to_next(old_ctx);
    }

    // ---- priority / nice ---------------------------------------------------

    pub fn set_priority(&mut self, priority: u8) -> Result<(), ThreadError> {
        if self.policy == Policy::Mlfqs {
            return Err(ThreadError::OutOfRange);
        }
        let cur = self.current.as_mut().expect("current thread always present");
        cur.base_priority = priority;
        cur.refresh_priority();
        drop(cur);
        self.maybe_preempt();
        Ok(())
    }

    pub fn get_priority(&self) -> u8 {
        self.current_priority()
    }

    pub fn set_nice(&mut self, nice: i32) {
        let cur = self.current.as_mut().expect("current thread always present");
        cur.nice = mlfqs::clamp_nice(nice);
        let priority = mlfqs::priority_calculator(mlfqs::Fp::from_raw(cur.recent_cpu), cur.nice);
        cur.priority = priority;
        drop(cur);
        self.maybe_preempt();
    }

    pub fn get_nice(&self) -> i32 {
        self.current.as_ref().expect("current thread always present").nice
    }

    pub fn get_recent_cpu(&self) -> i32 {
        mlfqs::Fp::from_raw(self.current.as_ref().expect("current thread always present").recent_cpu)
            .mul_int(100)
            .to_int_round()
    }

    pub fn get_load_avg(&self) -> i32 {
        self.load_avg.mul_int(100).to_int_round()
    }

    // ---- timer tick ---------------------------------------------------------

    /// Advance the tick counter, wake due sleepers, and (under MLFQS)
    /// recompute priorities. Grounded in `thread_tick`. Runs in interrupt
    /// context: never blocks, never switches; instead records whether the
    /// caller's post-interrupt epilogue should call `yield_now`.
    pub fn tick(&mut self) {
        self.ticks += 1;

        let mut i = 0;
        while i < self.sleepers.len() {
            if self.sleepers[i].wake_tick <= self.ticks {
                let t = self.sleepers.remove(i);
                self.unblock(t);
            } else {
                i += 1;
            }
        }

        if self.policy == Policy::Mlfqs {
            self.mlfqs_tick();
        }

        let quantum_expired = self
            .current
            .as_mut()
            .map(|cur| {
                cur.quantum_ticks += 1;
                cur.quantum_ticks >= TIME_SLICE
            })
            .unwrap_or(false);

        if self.should_preempt() || quantum_expired {
            self.pending_yield = true;
        }
    }

    fn mlfqs_tick(&mut self) {
        if let Some(cur) = self.current.as_mut() {
            if cur.name != "idle" {
                cur.recent_cpu = mlfqs::recent_cpu_increment(mlfqs::Fp::from_raw(cur.recent_cpu)).raw();
            }
        }

        if self.ticks % TIMER_FREQ == 0 {
            let ready = self.ready_queue.len() as i32
                + if self.current.is_some() { 1 } else { 0 };
            self.load_avg = mlfqs::load_avg_calculator(self.load_avg, ready);
            self.recalc_all_recent_cpu_and_priority();
        } else if self.ticks % TIME_SLICE == 0 {
            self.recalc_all_priority_only();
        }
    }

    fn recalc_all_recent_cpu_and_priority(&mut self) {
        let load_avg = self.load_avg;
        let threads = self
            .current
            .iter_mut()
            .chain(self.ready_queue.iter_mut())
            .chain(self.sleepers.iter_mut());
        for t in threads {
            t.recent_cpu = mlfqs::recent_cpu_calculator(mlfqs::Fp::from_raw(t.recent_cpu), load_avg, t.nice).raw();
            t.priority = mlfqs::priority_calculator(mlfqs::Fp::from_raw(t.recent_cpu), t.nice);
        }
    }

    fn recalc_all_priority_only(&mut self) {
        let threads = self
            .current
            .iter_mut()
            .chain(self.ready_queue.iter_mut())
            .chain(self.sleepers.iter_mut());
        for t in threads {
            t.priority = mlfqs::priority_calculator(mlfqs::Fp::from_raw(t.recent_cpu), t.nice);
        }
    }

    /// Whether a timer-tick-driven yield is owed. The outer kernel's timer
    /// interrupt epilogue should call this after `tick()` returns and, if
    /// true, call `yield_now()` from ordinary thread context (matching
    /// Pintos's `intr_yield_on_return`, which defers the actual context
    /// switch until the interrupt handler is about to return).
    pub fn take_pending_yield(&mut self) -> bool {
        core::mem::take(&mut self.pending_yield)
    }

    // ---- top-level scheduling entry points --------------------------------

    pub fn yield_now(&mut self) {
        self.reschedule(Disposition::Yield);
    }

    pub fn tid(&self) -> Tid {
        self.current_tid()
    }

    /// Drive the current thread off the CPU according to `disposition`.
    /// Grounded in `thread_yield`/`thread_exit`'s shared tail, `schedule`.
    pub fn reschedule(&mut self, disposition: Disposition) {
        assert!(!A::in_interrupt_context(), "cannot reschedule from interrupt context");
        match disposition {
            Disposition::Yield => {
                let mut t = self.current.take().expect("current thread always present");
                t.state = ThreadState::Ready;
                t.location = ThreadLocation::ReadyQueue;
                let old_ctx: *mut Context = &mut t.context;
                self.ready_queue.push_back(t);
                self.switch_to_next(old_ctx);
            }
            Disposition::Sleep(wake_tick) => self.sleep_until(wake_tick),
            Disposition::Exit(status) => {
                let t = self.current.take().expect("current thread always present");
                log::debug!("thread {} ({}) exiting with status {}", t.tid, t.name, status);
                *t.exit_channel.status.lock() = Some(status);
                let channel = t.exit_channel.clone();
                self.destruction.push(t);
                channel.exited.lock().up(self);
                self.switch_to_next_no_return();
            }
        }
    }

    /// Block the current thread until `child` exits, then return its exit
    /// status and drop the bookkeeping for it. Grounded in `process_wait`
    /// (outside the retrieved `original_source`, so the semantics here —
    /// waiting on a per-child semaphore instead of a single global one —
    /// are this crate's own, safe-by-construction design).
    pub fn wait(&mut self, child: Tid) -> Option<i32> {
        let channel = self
            .current
            .as_mut()
            .expect("current thread always present")
            .children
            .remove(&child)?;
        channel.exited.lock().down(self);
        let status = *channel.status.lock();
        status
    }

    fn pop_highest_ready(&mut self) -> Box<Thread> {
        let mut best = 0usize;
        for i in 1..self.ready_queue.len() {
            if self.ready_queue[i].priority > self.ready_queue[best].priority {
                best = i;
            }
        }
        self.ready_queue.remove(best).expect("ready queue non-empty")
    }

    fn switch_to_next(&mut self, old_ctx: *mut Context) {
        self.destruction.clear();
        let mut next = self.pop_highest_ready();
        next.state = ThreadState::Running;
        next.location = ThreadLocation::CurrentlyRunning;
        next.quantum_ticks = 0;
        let new_ctx: *const Context = &next.context;
        self.current = Some(next);
        unsafe { A::switch(old_ctx, new_ctx) };
    }

    fn switch_to_next_no_return(&mut self) -> ! {
        let mut next = self.pop_highest_ready();
        next.state = ThreadState::Running;
        next.location = ThreadLocation::CurrentlyRunning;
        next.quantum_ticks = 0;
        let new_ctx: *const Context = &next.context;
        self.current = Some(next);
        unsafe { A::restore(new_ctx) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::mock::MockArch;
    use crate::config::{DONATION_DEPTH_CAP, TIMER_FREQ};

    fn new_sched() -> Scheduler<MockArch> {
        Scheduler::new(Policy::Priority)
    }

    #[test]
    fn spawning_a_higher_priority_thread_preempts_the_current_one() {
        let mut sched = new_sched();
        sched.set_priority(5).unwrap();
        let a = sched.spawn("a", 10, 0, 0);
        assert_eq!(sched.current_tid(), a, "a outranks the current thread and must preempt it");
        let b = sched.spawn("b", 20, 0, 0);
        assert_eq!(sched.current_tid(), b, "b outranks a and must preempt it in turn");
    }

    #[test]
    fn lowering_the_current_threads_priority_yields_to_a_waiting_thread() {
        let mut sched = new_sched();
        sched.set_priority(5).unwrap();
        let a = sched.spawn("a", 10, 0, 0);
        let b = sched.spawn("b", 20, 0, 0);
        assert_eq!(sched.current_tid(), b);

        sched.set_priority(0).unwrap();
        assert_eq!(sched.current_tid(), a, "a is now the highest-priority ready thread");
    }

    #[test]
    fn donate_for_lock_raises_the_holders_priority_up_the_chain() {
        let mut sched = new_sched();
        sched.set_priority(5).unwrap();
        let low_tid = sched.spawn("low", 10, 0, 0);
        assert_eq!(sched.current_tid(), low_tid);

        let mut lock = Lock::new();
        lock.acquire(&mut sched);
        assert_eq!(sched.current_tid(), low_tid);
        assert_eq!(sched.current_priority(), 10);

        let high_tid = sched.spawn("high", 50, 0, 0);
        assert_eq!(sched.current_tid(), high_tid);

        sched.donate_for_lock(NonNull::from(&lock), DONATION_DEPTH_CAP);
        let low = sched.ready_queue.iter().find(|t| t.tid == low_tid).expect("low is still waiting, not current");
        assert_eq!(low.priority, 50, "low must inherit high's priority while it holds the contested lock");
        assert_eq!(low.base_priority, 10, "donation never touches base_priority");

        // Drop the donor below the donated value so `low` becomes current again.
        sched.set_priority(0).unwrap();
        assert_eq!(sched.current_tid(), low_tid);

        lock.release(&mut sched);
        assert_eq!(sched.current_priority(), 10, "releasing the lock must drop the donation");
    }

    #[test]
    fn tick_wakes_sleepers_by_wake_tick_not_insertion_order() {
        let mut sched = new_sched();
        sched.set_priority(0).unwrap();
        let a = sched.spawn("a", 10, 0, 0);
        sched.sleep_until(50);
        let b = sched.spawn("b", 10, 0, 0);
        sched.sleep_until(30);
        assert_eq!(sched.sleepers.len(), 2);

        for _ in 0..29 {
            sched.tick();
        }
        assert_eq!(sched.sleepers.len(), 2, "neither wake_tick has arrived yet");

        sched.tick();
        assert_eq!(sched.ticks(), 30);
        assert_eq!(sched.sleepers.len(), 1, "b (wake_tick 30) must wake before a (wake_tick 50)");
        assert!(sched.sleepers.iter().any(|t| t.tid == a));
        assert_eq!(sched.current_tid(), b, "waking b preempts the lower-priority current thread");

        for _ in 0..19 {
            sched.tick();
        }
        assert_eq!(sched.sleepers.len(), 1);

        sched.tick();
        assert_eq!(sched.ticks(), 50);
        assert_eq!(sched.sleepers.len(), 0, "a must finally wake at its own wake_tick");
        assert!(sched.ready_queue.iter().any(|t| t.tid == a));
    }

    #[test]
    fn mlfqs_rejects_set_priority() {
        let mut sched: Scheduler<MockArch> = Scheduler::new(Policy::Mlfqs);
        assert!(matches!(sched.set_priority(50), Err(ThreadError::OutOfRange)));
    }

    #[test]
    fn mlfqs_gives_a_higher_nice_thread_a_lower_priority_over_time() {
        let mut sched: Scheduler<MockArch> = Scheduler::new(Policy::Mlfqs);
        let low_nice = sched.spawn("low_nice", PRI_DEFAULT, 0, 0);
        let high_nice = sched.spawn("high_nice", PRI_DEFAULT, 0, 0);
        assert_eq!(sched.current_name(), "main", "equal priority spawns must not preempt");

        for t in sched.ready_queue.iter_mut() {
            if t.tid == high_nice {
                t.nice = 20;
            }
        }

        for _ in 0..TIMER_FREQ {
            sched.tick();
        }

        let hi_pri = sched.ready_queue.iter().find(|t| t.tid == high_nice).unwrap().priority;
        let lo_pri = sched.ready_queue.iter().find(|t| t.tid == low_nice).unwrap().priority;
        assert!(hi_pri < lo_pri, "higher nice must yield a lower recomputed priority: hi={hi_pri} lo={lo_pri}");
    }
}
