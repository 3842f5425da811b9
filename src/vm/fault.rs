//! Page-fault handling, frame claiming, clock eviction, and user-stack
//! growth.
//!
//! Grounded in `vm/vm.c`: `vm_try_handle_fault` decides between claiming
//! an already-registered page, growing the stack, or failing; `vm_get_frame`
//! claims a frame (evicting via `vm_get_victim`'s clock algorithm when
//! none are free); `vm_do_claim_page` loads a page's backing into its
//! frame and installs the mapping.

use super::{file, PageInit, PageState, ProcessId, VirtAddr, VmError, VmPlatform, VirtualMemory};
use crate::config::{STACK_GROWTH_SLACK, STACK_LIMIT};

/// Result of attempting to service a page fault. Grounded in the
/// tri-state `vm_try_handle_fault` return combined with `page_fault`'s
/// kill-vs-continue decision in `exception.c` (not in the retrieved
/// source, but implied by every caller of `vm_try_handle_fault`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A registered page was faulted in; resume the instruction.
    Handled,
    /// The user stack grew by one page; resume the instruction.
    StackGrown,
    /// Write attempted against a read-only page.
    WriteProtected,
    /// No page is registered here and it isn't a plausible stack access;
    /// the faulting thread should be killed.
    SegmentationFault,
}

impl<P: VmPlatform> VirtualMemory<P> {
    /// Service a page fault at `fault_addr`. `stack_pointer` is the
    /// trapped `rsp` (needed to recognize a `push`-style stack-growth
    /// access below the lowest mapped stack page), and `write` is whether
    /// the faulting access was a write. Grounded in `vm_try_handle_fault`.
    pub fn handle_fault(
        &mut self,
        pid: ProcessId,
        fault_addr: VirtAddr,
        write: bool,
        stack_pointer: usize,
    ) -> FaultOutcome {
        let va = VirtAddr::new(fault_addr.as_usize());

        let existing = self.spaces.get(&pid).and_then(|s| s.pages.get(&va).map(|p| (p.frame.is_some(), p.writable)));

        if let Some((resident, writable)) = existing {
            if resident {
                return if write && !writable { FaultOutcome::WriteProtected } else { FaultOutcome::Handled };
            }
            return match self.claim_page(pid, va) {
                Ok(()) => FaultOutcome::Handled,
                Err(_) => FaultOutcome::SegmentationFault,
            };
        }

        if self.is_stack_growth(pid, fault_addr.as_usize(), stack_pointer) {
            self.grow_stack(pid, va);
            return match self.claim_page(pid, va) {
                Ok(()) => FaultOutcome::StackGrown,
                Err(_) => FaultOutcome::SegmentationFault,
            };
        }

        log::warn!("unhandled page fault for {} at {} (write={})", pid, va, write);
        FaultOutcome::SegmentationFault
    }

    /// Whether an unmapped faulting address plausibly represents the user
    /// stack growing by one page: within `STACK_LIMIT` of the top of the
    /// stack region, and no more than `STACK_GROWTH_SLACK` bytes below the
    /// trapped stack pointer (covering `push`/`pusha`-style accesses that
    /// write below `rsp` before it is adjusted). Grounded in the stack
    /// growth heuristic `vm_try_handle_fault` delegates to.
    fn is_stack_growth(&self, pid: ProcessId, fault_addr: usize, stack_pointer: usize) -> bool {
        let Some(space) = self.spaces.get(&pid) else { return false };
        if fault_addr >= space.stack_bottom.as_usize() {
            return false;
        }
        if space.stack_bottom.as_usize() - VirtAddr::new(fault_addr).as_usize() > STACK_LIMIT {
            return false;
        }
        fault_addr + STACK_GROWTH_SLACK >= stack_pointer
    }

    fn grow_stack(&mut self, pid: ProcessId, va: VirtAddr) {
        let space = self.spaces.get_mut(&pid).expect("address space exists");
        space.pages.insert(
            va,
            super::Page {
                va,
                state: PageState::Uninit { init: PageInit::AnonZeroed },
                frame: None,
                writable: true,
                is_stack: true,
            },
        );
        space.stack_bottom = va;
    }

    /// Claim a frame for the page at `va` (allocating or evicting as
    /// needed), load its backing content, and install the mapping.
    /// Grounded in `vm_do_claim_page`/`vm_claim_page`.
    pub fn claim_page(&mut self, pid: ProcessId, va: VirtAddr) -> Result<(), VmError> {
        let frame = self.obtain_frame()?;

        {
            let space = self.spaces.get_mut(&pid).expect("address space exists");
            let page = space.pages.get_mut(&va).expect("page registered before claiming");
            let writable = page.writable;

            match &mut page.state {
                PageState::Uninit { init } => match init {
                    PageInit::AnonZeroed => {
                        for b in self.frames.bytes_mut(frame) {
                            *b = 0;
                        }
                        page.state = PageState::Anon { swap_slot: None };
                    }
                    PageInit::File { file, file_offset, read_len, writable: file_writable } => {
                        let file = file.clone();
                        let (file_offset, read_len, file_writable) = (*file_offset, *read_len, *file_writable);
                        file::load_file_page(self.frames.bytes_mut(frame), &file, file_offset, read_len);
                        page.state = PageState::File { file, file_offset, read_len, writable: file_writable };
                    }
                },
                PageState::Anon { swap_slot } => {
                    if let Some(slot) = swap_slot.take() {
                        self.swap.swap_in(slot, self.frames.bytes_mut(frame));
                    } else {
                        for b in self.frames.bytes_mut(frame) {
                            *b = 0;
                        }
                    }
                }
                PageState::File { file, file_offset, read_len, .. } => {
                    let file = file.clone();
                    let (file_offset, read_len) = (*file_offset, *read_len);
                    file::load_file_page(self.frames.bytes_mut(frame), &file, file_offset, read_len);
                }
            }

            page.frame = Some(frame);
            space.mmu.map(va, frame, writable);
        }

        self.note_resident(pid, va);
        Ok(())
    }

    pub(super) fn obtain_frame(&mut self) -> Result<super::FrameId, VmError> {
        if let Some(f) = self.frames.alloc() {
            return Ok(f);
        }
        self.evict_one()?;
        self.frames.alloc().ok_or(VmError::OutOfFrames)
    }

    /// Second-chance clock eviction. Grounded in `vm_get_victim`: walk the
    /// clock hand forward, clearing and skipping any page whose accessed
    /// bit is set, until one with a clear bit is found.
    fn evict_one(&mut self) -> Result<(), VmError> {
        if self.clock.is_empty() {
            return Err(VmError::OutOfFrames);
        }
        let len = self.clock.len();
        let mut scanned = 0;
        let victim_idx = loop {
            if self.clock_hand >= len {
                self.clock_hand = 0;
            }
            let (owner, va) = self.clock[self.clock_hand];
            let accessed = self.spaces.get(&owner).map(|s| s.mmu.is_accessed(va)).unwrap_or(false);
            if accessed {
                if let Some(s) = self.spaces.get_mut(&owner) {
                    s.mmu.clear_accessed(va);
                }
                self.clock_hand = (self.clock_hand + 1) % len;
                scanned += 1;
                if scanned > 2 * len {
                    break self.clock_hand;
                }
            } else {
                break self.clock_hand;
            }
        };
        let (owner, va) = self.clock.remove(victim_idx);
        if self.clock_hand > victim_idx {
            self.clock_hand -= 1;
        }
        self.evict_page(owner, va)
    }

    /// Write a resident page's contents out (to swap for anon pages, back
    /// to the file for dirty writable file pages) and release its frame.
    /// Grounded in `vm_evict_frame`.
    fn evict_page(&mut self, pid: ProcessId, va: VirtAddr) -> Result<(), VmError> {
        let space = self.spaces.get_mut(&pid).expect("clock entry names a live address space");
        let page = space.pages.get_mut(&va).expect("clock entry names a resident page");
        let frame = page.frame.take().expect("clock entry is resident");
        let dirty = space.mmu.is_dirty(va);
        space.mmu.unmap(va);

        match &mut page.state {
            PageState::Anon { swap_slot } => {
                let bytes = self.frames.bytes(frame);
                let slot = self.swap.swap_out(bytes).ok_or(VmError::OutOfSwap)?;
                *swap_slot = Some(slot);
            }
            PageState::File { file, file_offset, read_len, writable } => {
                if *writable && dirty {
                    let bytes = self.frames.bytes(frame);
                    file.write_at(*file_offset, &bytes[..*read_len]);
                }
            }
            PageState::Uninit { .. } => unreachable!("uninit pages are never resident"),
        }

        self.frames.free(frame);
        Ok(())
    }
}

