//! Which of Pintos's two scheduling disciplines is active.

/// Grounded in `thread_init`/`thread_tick`'s `thread_mlfqs` flag: a single
/// boolean in the original, promoted to an enum here so the scheduler can
/// match on it instead of branching on a loose bool everywhere it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Strict priority scheduling with donation (the default).
    Priority,
    /// Multi-level feedback queue scheduler: priorities are recomputed
    /// automatically from `nice` and `recent_cpu`, and `set_priority` is
    /// rejected.
    Mlfqs,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::Priority
    }
}
