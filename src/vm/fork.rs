//! Fork's per-page address-space duplication.
//!
//! Grounded in `vm/vm.c`'s `supplemental_page_table_copy`: an uninit page
//! duplicates whatever initializer it was waiting on, a resident
//! anonymous page gets a fresh frame and a byte-for-byte copy, an
//! anonymous page already swapped out shares the swap slot instead of
//! duplicating it (`fork_cnt` in the original), and a file-backed page is
//! never copied eagerly — the child reopens the file and re-faults the
//! same way a first-time fault would.

use super::{swap::SwapSlot, AddressSpace, Page, PageInit, PageState, ProcessId, VirtAddr, VirtualMemory, VmError, VmPlatform};
use alloc::vec::Vec;

enum Plan<P: VmPlatform> {
    Uninit(PageInit<P>),
    AnonShared(SwapSlot),
    AnonResident(Vec<u8>),
    /// An anonymous page with neither a resident frame nor a swap slot.
    /// Not reachable in practice (an allocated-but-untouched page is
    /// still `Uninit`), kept only so the match is exhaustive; the child
    /// just gets an equally empty page.
    AnonEmpty,
    File { file: P::File, file_offset: u64, read_len: usize, writable: bool },
}

fn clone_init<P: VmPlatform>(init: &PageInit<P>) -> PageInit<P> {
    match init {
        PageInit::AnonZeroed => PageInit::AnonZeroed,
        PageInit::File { file, file_offset, read_len, writable } => {
            PageInit::File { file: file.clone(), file_offset: *file_offset, read_len: *read_len, writable: *writable }
        }
    }
}

impl<P: VmPlatform> VirtualMemory<P> {
    /// Duplicate `parent`'s address space into a freshly created address
    /// space for `child`, using `child_mmu` as the child's (empty)
    /// page-table manipulator. Grounded in `supplemental_page_table_copy`.
    pub fn fork_address_space(&mut self, parent: ProcessId, child: ProcessId, child_mmu: P::Mmu) -> Result<(), VmError> {
        let parent_space = self.spaces.get(&parent).ok_or(VmError::NoSuchPage)?;
        let stack_bottom = parent_space.stack_bottom;
        let mmaps = parent_space.mmaps.clone();
        let vas: Vec<VirtAddr> = parent_space.pages.keys().copied().collect();

        let mut child_space = AddressSpace::new(child_mmu, stack_bottom);
        child_space.mmaps = mmaps;
        self.spaces.insert(child, child_space);

        for va in vas {
            let (writable, is_stack, plan) = {
                let page = self.spaces.get(&parent).expect("parent space exists").pages.get(&va).expect("va came from this space");
                let plan = match &page.state {
                    PageState::Uninit { init } => Plan::Uninit(clone_init(init)),
                    PageState::Anon { swap_slot: Some(slot) } => Plan::AnonShared(*slot),
                    PageState::Anon { swap_slot: None } => match page.frame {
                        Some(f) => Plan::AnonResident(self.frames.bytes(f).to_vec()),
                        None => Plan::AnonEmpty,
                    },
                    PageState::File { file, file_offset, read_len, writable } => {
                        Plan::File { file: file.clone(), file_offset: *file_offset, read_len: *read_len, writable: *writable }
                    }
                };
                (page.writable, page.is_stack, plan)
            };

            let (state, frame) = match plan {
                Plan::Uninit(init) => (PageState::Uninit { init }, None),
                Plan::AnonShared(slot) => {
                    self.swap.share(slot);
                    (PageState::Anon { swap_slot: Some(slot) }, None)
                }
                Plan::AnonResident(bytes) => {
                    let frame = self.obtain_frame()?;
                    self.frames.bytes_mut(frame).copy_from_slice(&bytes);
                    (PageState::Anon { swap_slot: None }, Some(frame))
                }
                Plan::AnonEmpty => (PageState::Anon { swap_slot: None }, None),
                Plan::File { file, file_offset, read_len, writable } => {
                    (PageState::Uninit { init: PageInit::File { file, file_offset, read_len, writable } }, None)
                }
            };

            let resident = frame.is_some();
            let child_space = self.spaces.get_mut(&child).expect("child space just created");
            child_space.pages.insert(va, Page { va, state, frame, writable, is_stack });
            if let Some(f) = frame {
                child_space.mmu.map(va, f, writable);
            }
            if resident {
                self.note_resident(child, va);
            }
        }

        Ok(())
    }
}
