//! Compile-time tunables for the scheduler and virtual memory subsystems.
//!
//! Mirrors `atomic_os::scheduler`'s practice of hard-coding stack sizes as
//! `const`s rather than reading a config file — this is kernel core code,
//! not an application with a config format.

/// Number of timer ticks given to a thread before it is preempted under the
/// strict-priority/round-robin policy.
pub const TIME_SLICE: u64 = 4;

/// Ticks per second of the timer source, used by the MLFQS `load_avg` and
/// `recent_cpu` recalculation cadence.
pub const TIMER_FREQ: u64 = 100;

/// Lowest/highest priority a thread may hold (inclusive).
pub const PRI_MIN: u8 = 0;
pub const PRI_MAX: u8 = 63;
pub const PRI_DEFAULT: u8 = 31;

/// Default `nice` value for new threads under MLFQS.
pub const NICE_DEFAULT: i32 = 0;
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 20;

/// Maximum number of lock-wait hops the priority donation walk will follow.
/// Bounds the cost of the walk; acquiring a lock already held by the current
/// thread is forbidden, so a legitimate cycle can never occur. Applied
/// uniformly by every caller of the walk, including `set_priority`.
pub const DONATION_DEPTH_CAP: u8 = 8;

/// Size of one virtual memory page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of one swap-disk sector, in bytes. A page occupies exactly
/// `PAGE_SIZE / SECTOR_SIZE` contiguous sectors.
pub const SECTOR_SIZE: usize = 512;
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Top of the user address space and the maximum size a single user stack
/// may grow to before a deep write is treated as a fault rather than a
/// legitimate stack-growth request.
pub const USER_STACK_TOP: usize = 0x4747_0000_0000;
pub const STACK_LIMIT: usize = 1024 * 1024;

/// How many bytes below the trapped stack pointer a fault address may fall
/// and still be treated as a `push`/`pusha`-style stack-growth access.
pub const STACK_GROWTH_SLACK: usize = 8;
