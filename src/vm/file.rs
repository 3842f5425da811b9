//! Backing-file boundary and the mmap/munmap operations built on it.
//!
//! Grounded in `vm/file.c`: `do_mmap` registers one uninit page per
//! file-sized chunk (`lazy_load_file_segment` defers the actual read
//! until the page faults in), and `do_munmap` walks the same run of
//! pages writing back any that are dirty and writable before unmapping
//! them. The open-file handle itself (`struct file *` in the original) is
//! represented here as `P::File`, cloned once per page the same way
//! Pintos's `file_reopen` gives each page its own reference.

use crate::vm::{MmapError, Page, PageInit, PageState, ProcessId, VirtAddr, VmPlatform, VmError, VirtualMemory};

/// A file handle this crate reads and writes full pages through. Grounded
/// in `file.c`'s use of `file_read_at`/`file_write_at`.
pub trait BackingFile: Clone {
    fn length(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;
    fn write_at(&self, offset: u64, buf: &[u8]) -> usize;
}

impl<P: VmPlatform> VirtualMemory<P> {
    /// Map `length` bytes of `file` starting at `file_offset` into the
    /// process's address space at `addr`. Grounded in `do_mmap`.
    pub fn mmap(
        &mut self,
        pid: ProcessId,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: P::File,
        file_offset: u64,
    ) -> Result<VirtAddr, MmapError> {
        if length == 0 {
            return Err(MmapError::ZeroLength);
        }
        if addr.as_usize() % crate::config::PAGE_SIZE != 0 || file_offset % crate::config::PAGE_SIZE as u64 != 0 {
            return Err(MmapError::NotPageAligned);
        }
        if file_offset >= file.length() && file.length() > 0 {
            return Err(MmapError::FileTooShortForOffset);
        }

        let page_count = length.div_ceil(crate::config::PAGE_SIZE);
        let space = self.spaces.get_mut(&pid).expect("address space exists");

        for i in 0..page_count {
            let va = VirtAddr(addr.as_usize() + i * crate::config::PAGE_SIZE);
            if space.pages.contains_key(&va) {
                return Err(MmapError::OverlapsExisting);
            }
            if va >= space.stack_bottom {
                return Err(MmapError::OverlapsStackOrExecutable);
            }
        }

        let mut remaining = length as u64;
        for i in 0..page_count {
            let va = VirtAddr(addr.as_usize() + i * crate::config::PAGE_SIZE);
            let read_len = remaining.min(crate::config::PAGE_SIZE as u64) as usize;
            remaining -= read_len as u64;
            space.pages.insert(
                va,
                Page {
                    va,
                    state: PageState::Uninit {
                        init: PageInit::File {
                            file: file.clone(),
                            file_offset: file_offset + (i * crate::config::PAGE_SIZE) as u64,
                            read_len,
                            writable,
                        },
                    },
                    frame: None,
                    writable,
                    is_stack: false,
                },
            );
        }
        space.mmaps.insert(addr, page_count);
        Ok(addr)
    }

    /// Unmap a region previously returned by [`VirtualMemory::mmap`],
    /// writing back any resident, dirty, writable pages. Grounded in
    /// `do_munmap`.
    pub fn munmap(&mut self, pid: ProcessId, addr: VirtAddr) -> Result<(), VmError> {
        let page_count = {
            let space = self.spaces.get(&pid).ok_or(VmError::NoSuchPage)?;
            *space.mmaps.get(&addr).ok_or(VmError::NoSuchPage)?
        };

        for i in 0..page_count {
            let va = VirtAddr(addr.as_usize() + i * crate::config::PAGE_SIZE);
            self.writeback_if_dirty(pid, va);

            let space = self.spaces.get_mut(&pid).expect("address space exists");
            if let Some(page) = space.pages.remove(&va) {
                if let Some(frame) = page.frame {
                    space.mmu.unmap(va);
                    self.frames.free(frame);
                    self.forget_resident(pid, va);
                }
            }
        }

        self.spaces.get_mut(&pid).expect("address space exists").mmaps.remove(&addr);
        Ok(())
    }

    fn writeback_if_dirty(&mut self, pid: ProcessId, va: VirtAddr) {
        let space = match self.spaces.get_mut(&pid) {
            Some(s) => s,
            None => return,
        };
        let Some(page) = space.pages.get(&va) else { return };
        let Some(frame) = page.frame else { return };
        let PageState::File { ref file, file_offset, read_len, writable } = page.state else { return };
        if writable && space.mmu.is_dirty(va) {
            let bytes = self.frames.bytes(frame);
            file.write_at(file_offset, &bytes[..read_len]);
        }
    }
}

/// Load a file-backed page's contents into its claimed frame, zero-filling
/// any tail bytes past `read_len`. Grounded in `file_backed_initializer`
/// and `load_file_page`.
pub(crate) fn load_file_page(bytes: &mut [u8], file: &impl BackingFile, file_offset: u64, read_len: usize) {
    let got = file.read_at(file_offset, &mut bytes[..read_len]);
    for b in &mut bytes[got..] {
        *b = 0;
    }
}

