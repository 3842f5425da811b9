//! Page-table manipulation boundary.
//!
//! Grounded in `vm.c`'s thin wrappers around Pintos's `pml4.c`
//! (`pml4_set_page`/`pml4_clear_page`/`pml4_is_dirty`/`pml4_is_accessed`).
//! An outer kernel backs this with real x86_64 page tables (the `x86_64`
//! crate's `PageTable`/`Mapper` types are the natural fit, the way
//! `atomic_os::memory::paging` already depends on that crate); tests use
//! an in-memory mock.

use crate::vm::{frame::FrameId, VirtAddr};

/// One process's page-table manipulator. Each `AddressSpace` owns one.
pub trait Mmu {
    /// Map `va` to the physical frame `frame`, with write permission iff
    /// `writable`. Must overwrite any existing mapping at `va`.
    fn map(&mut self, va: VirtAddr, frame: FrameId, writable: bool);

    /// Remove whatever mapping exists at `va`, if any.
    fn unmap(&mut self, va: VirtAddr);

    fn is_mapped(&self, va: VirtAddr) -> bool;

    /// Hardware dirty bit: true if a write has occurred at `va` since the
    /// bit was last cleared.
    fn is_dirty(&self, va: VirtAddr) -> bool;
    fn clear_dirty(&mut self, va: VirtAddr);

    /// Hardware accessed bit, used by the clock eviction algorithm as the
    /// second-chance signal. Grounded in `vm_get_victim`'s use of
    /// `pml4_is_accessed`.
    fn is_accessed(&self, va: VirtAddr) -> bool;
    fn clear_accessed(&mut self, va: VirtAddr);
}
