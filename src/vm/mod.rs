//! Demand-paged virtual memory: supplemental page tables, anonymous and
//! file-backed pages, clock eviction, swap, and mmap.
//!
//! Grounded in `vm/vm.c`, `vm/anon.c`, and `vm/file.c`. The biggest
//! structural change from the original is the eviction list: Pintos
//! threads a single intrusive `frame_table` list through `struct frame`
//! objects reachable via raw pointers from anywhere in the kernel. That
//! relies on every frame outliving every pointer into it, which Rust's
//! ownership rules won't let a safe abstraction assume for free. Instead,
//! [`VirtualMemory`] owns every process's [`AddressSpace`] in a
//! `BTreeMap` keyed by `ProcessId`, and the clock hand walks a `Vec` of
//! plain `(ProcessId, VirtAddr)` pairs — enough to look a page back up
//! through its owning `AddressSpace` without ever aliasing it.

pub mod fault;
pub mod file;
pub mod fork;
pub mod frame;
pub mod mmu;
#[cfg(test)]
pub mod mock;
pub mod swap;
#[cfg(test)]
mod tests;

use crate::config::PAGE_SIZE;
use crate::thread::Tid;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

pub use fault::FaultOutcome;
pub use file::BackingFile;
pub use frame::{Frame, FrameId, FrameSource};
pub use mmu::Mmu;
pub use swap::SwapDisk;

/// A process (= thread, in this core's scope) owning an address space.
pub type ProcessId = Tid;

/// A page-aligned virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub fn new(addr: usize) -> Self {
        VirtAddr(addr & !(PAGE_SIZE - 1))
    }

    pub fn offset_within_page(addr: usize) -> usize {
        addr & (PAGE_SIZE - 1)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug)]
pub enum VmError {
    AlreadyMapped,
    NoSuchPage,
    OutOfFrames,
    OutOfSwap,
    BackingIoError,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::AlreadyMapped => write!(f, "a page is already mapped at that address"),
            VmError::NoSuchPage => write!(f, "no page mapped at that address"),
            VmError::OutOfFrames => write!(f, "no physical frame available and none could be evicted"),
            VmError::OutOfSwap => write!(f, "swap disk exhausted"),
            VmError::BackingIoError => write!(f, "backing file I/O failed"),
        }
    }
}

#[derive(Debug)]
pub enum MmapError {
    ZeroLength,
    NotPageAligned,
    OverlapsExisting,
    OverlapsStackOrExecutable,
    FileTooShortForOffset,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmapError::ZeroLength => write!(f, "cannot mmap a zero-length file"),
            MmapError::NotPageAligned => write!(f, "address or offset is not page-aligned"),
            MmapError::OverlapsExisting => write!(f, "mapping range overlaps an existing page"),
            MmapError::OverlapsStackOrExecutable => write!(f, "mapping range overlaps the stack or executable image"),
            MmapError::FileTooShortForOffset => write!(f, "file is shorter than the requested offset"),
        }
    }
}

/// Which backing a page has, and how to refill it on a fault. Grounded in
/// `vm.c`'s `page_get_type`/`enum vm_type` and each `*_initializer`.
pub enum PageState<P: VmPlatform> {
    /// Not yet backed by anything concrete; `init` supplies the backing
    /// the first time the page is faulted in. Grounded in
    /// `vm_alloc_page_with_initializer`'s uninit page.
    Uninit { init: PageInit<P> },
    /// Zero-fill-on-demand / swap-backed memory. Grounded in `anon.c`.
    Anon { swap_slot: Option<swap::SwapSlot> },
    /// Backed by a range of an open file, written back on eviction only if
    /// the mapping is writable. Grounded in `file.c`.
    File { file: P::File, file_offset: u64, read_len: usize, writable: bool },
}

/// What an uninit page becomes once it is first faulted in.
pub enum PageInit<P: VmPlatform> {
    AnonZeroed,
    File { file: P::File, file_offset: u64, read_len: usize, writable: bool },
}

pub struct Page<P: VmPlatform> {
    pub va: VirtAddr,
    pub state: PageState<P>,
    pub frame: Option<FrameId>,
    pub writable: bool,
    /// Set for the page just below a user stack's lowest mapped page, so
    /// the fault handler recognizes a legitimate stack-growth access.
    pub is_stack: bool,
}

/// One process's supplemental page table plus the pieces of address-space
/// state that sit outside any single page: page-table root, stack
/// extent, and the set of mmap'd ranges (so `munmap` can find them by
/// starting address). Grounded in `vm.c`'s `struct supplemental_page_table`
/// and `process.h`'s stack/mmap bookkeeping.
pub struct AddressSpace<P: VmPlatform> {
    pub pages: BTreeMap<VirtAddr, Page<P>>,
    pub mmu: P::Mmu,
    pub stack_bottom: VirtAddr,
    /// Active mmap regions, keyed by starting address, valued by page
    /// count, so `munmap` can find the exact run of pages a prior `mmap`
    /// registered.
    pub mmaps: BTreeMap<VirtAddr, usize>,
}

impl<P: VmPlatform> AddressSpace<P> {
    pub fn new(mmu: P::Mmu, stack_bottom: VirtAddr) -> Self {
        AddressSpace { pages: BTreeMap::new(), mmu, stack_bottom, mmaps: BTreeMap::new() }
    }
}

/// The collaborator types a concrete kernel plugs in: the page-table
/// manipulator, the physical frame source, the swap disk, and the
/// open-file handle type mmap reads and writes through. Bundling them in
/// one trait keeps `VirtualMemory` from needing four independent generic
/// parameters everywhere it appears.
pub trait VmPlatform: Sized {
    type Mmu: mmu::Mmu;
    type Frames: frame::FrameSource;
    type Swap: swap::SwapDisk;
    type File: file::BackingFile;
}

/// Owner of every process's address space and the cross-process clock
/// eviction list. Grounded in `vm.c`'s frame table plus `vm_get_victim`'s
/// clock-hand walk, reshaped so the list holds lookup keys instead of
/// aliasing pointers.
pub struct VirtualMemory<P: VmPlatform> {
    pub spaces: BTreeMap<ProcessId, AddressSpace<P>>,
    pub frames: P::Frames,
    pub swap: swap::SwapTable<P::Swap>,
    /// `(owner, va)` for every currently resident page, in clock order.
    /// `clock_hand` is the index of the next candidate to examine.
    clock: Vec<(ProcessId, VirtAddr)>,
    clock_hand: usize,
}

impl<P: VmPlatform> VirtualMemory<P> {
    pub fn new(frames: P::Frames, swap_disk: P::Swap) -> Self {
        VirtualMemory {
            spaces: BTreeMap::new(),
            frames,
            swap: swap::SwapTable::new(swap_disk),
            clock: Vec::new(),
            clock_hand: 0,
        }
    }

    pub fn create_address_space(&mut self, pid: ProcessId, space: AddressSpace<P>) {
        self.spaces.insert(pid, space);
    }

    pub fn address_space(&self, pid: ProcessId) -> Option<&AddressSpace<P>> {
        self.spaces.get(&pid)
    }

    pub fn address_space_mut(&mut self, pid: ProcessId) -> Option<&mut AddressSpace<P>> {
        self.spaces.get_mut(&pid)
    }

    /// Register a page's virtual address with the supplemental page table
    /// without yet giving it a frame. Grounded in
    /// `vm_alloc_page_with_initializer`/`spt_insert_page`.
    pub fn alloc_page(
        &mut self,
        pid: ProcessId,
        va: VirtAddr,
        writable: bool,
        init: PageInit<P>,
    ) -> Result<(), VmError> {
        let space = self.spaces.get_mut(&pid).expect("address space exists");
        if space.pages.contains_key(&va) {
            return Err(VmError::AlreadyMapped);
        }
        space.pages.insert(
            va,
            Page { va, state: PageState::Uninit { init }, frame: None, writable, is_stack: false },
        );
        Ok(())
    }

    /// Remove a process's address space entirely: write back any resident,
    /// dirty, writable FILE pages, then free its frames and swap slots and
    /// drop it from the clock list. Grounded in
    /// `supplemental_page_table_kill`, which calls `destroy` on every page
    /// (the FILE page's `destroy` hook is `file_backed_destroy`, which is
    /// exactly `do_munmap`'s writeback-then-unmap).
    pub fn destroy_address_space(&mut self, pid: ProcessId) {
        if let Some(space) = self.spaces.remove(&pid) {
            for (va, page) in space.pages.iter() {
                if let (Some(frame), PageState::File { file, file_offset, read_len, writable }) =
                    (page.frame, &page.state)
                {
                    if *writable && space.mmu.is_dirty(*va) {
                        let bytes = self.frames.bytes(frame);
                        file.write_at(*file_offset, &bytes[..*read_len]);
                    }
                }
            }
            for (_, page) in space.pages {
                if let Some(frame) = page.frame {
                    self.frames.free(frame);
                }
                if let PageState::Anon { swap_slot: Some(slot) } = page.state {
                    self.swap.free(slot);
                }
            }
        }
        self.clock.retain(|(owner, _)| *owner != pid);
        if self.clock_hand >= self.clock.len() {
            self.clock_hand = 0;
        }
    }

    fn note_resident(&mut self, pid: ProcessId, va: VirtAddr) {
        self.clock.push((pid, va));
    }

    fn forget_resident(&mut self, pid: ProcessId, va: VirtAddr) {
        if let Some(idx) = self.clock.iter().position(|&(o, a)| o == pid && a == va) {
            self.clock.remove(idx);
            if self.clock_hand > idx {
                self.clock_hand -= 1;
            }
        }
    }
}
