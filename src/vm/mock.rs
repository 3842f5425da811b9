//! Host-only mock collaborators for exercising the VM subsystem without
//! real page tables or a real disk: a fixed pool of byte-array frames, an
//! in-memory swap disk, a `BTreeMap`-backed page table tracking its own
//! dirty/accessed bits, and a shared-buffer file. Mirrors
//! [`crate::arch::mock::MockArch`]'s role for the scheduler.

use super::file::BackingFile;
use super::frame::{FrameId, FrameSource};
use super::mmu::Mmu;
use super::swap::SwapDisk;
use super::{VirtAddr, VmPlatform};
use crate::config::PAGE_SIZE;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub struct MockFrames {
    frames: Vec<[u8; PAGE_SIZE]>,
    free: Vec<FrameId>,
}

impl MockFrames {
    pub fn new(capacity: usize) -> Self {
        let frames = alloc::vec![[0u8; PAGE_SIZE]; capacity];
        let free = (0..capacity).rev().map(FrameId).collect();
        MockFrames { frames, free }
    }
}

impl FrameSource for MockFrames {
    fn alloc(&mut self) -> Option<FrameId> {
        self.free.pop()
    }

    fn free(&mut self, frame: FrameId) {
        self.free.push(frame);
    }

    fn bytes_mut(&mut self, frame: FrameId) -> &mut [u8] {
        &mut self.frames[frame.0]
    }

    fn bytes(&self, frame: FrameId) -> &[u8] {
        &self.frames[frame.0]
    }
}

struct MockEntry {
    frame: FrameId,
    writable: bool,
    dirty: bool,
    accessed: bool,
}

#[derive(Default)]
pub struct MockMmu {
    entries: BTreeMap<VirtAddr, MockEntry>,
}

impl MockMmu {
    /// Test helper simulating a hardware write: sets both the dirty and
    /// accessed bits the way a real page-table walk would on a store.
    pub fn simulate_write(&mut self, va: VirtAddr) {
        if let Some(e) = self.entries.get_mut(&va) {
            e.dirty = true;
            e.accessed = true;
        }
    }

    pub fn writable_at(&self, va: VirtAddr) -> Option<bool> {
        self.entries.get(&va).map(|e| e.writable)
    }
}

impl Mmu for MockMmu {
    fn map(&mut self, va: VirtAddr, frame: FrameId, writable: bool) {
        self.entries.insert(va, MockEntry { frame, writable, dirty: false, accessed: false });
    }

    fn unmap(&mut self, va: VirtAddr) {
        self.entries.remove(&va);
    }

    fn is_mapped(&self, va: VirtAddr) -> bool {
        self.entries.contains_key(&va)
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).map(|e| e.dirty).unwrap_or(false)
    }

    fn clear_dirty(&mut self, va: VirtAddr) {
        if let Some(e) = self.entries.get_mut(&va) {
            e.dirty = false;
        }
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.entries.get(&va).map(|e| e.accessed).unwrap_or(false)
    }

    fn clear_accessed(&mut self, va: VirtAddr) {
        if let Some(e) = self.entries.get_mut(&va) {
            e.accessed = false;
        }
    }
}

pub struct MockSwapDisk {
    sectors: Vec<[u8; 512]>,
}

impl MockSwapDisk {
    pub fn new(sector_count: usize) -> Self {
        MockSwapDisk { sectors: alloc::vec![[0u8; 512]; sector_count] }
    }
}

impl SwapDisk for MockSwapDisk {
    fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    fn read_sector(&mut self, sector: usize, buf: &mut [u8; 512]) {
        buf.copy_from_slice(&self.sectors[sector]);
    }

    fn write_sector(&mut self, sector: usize, buf: &[u8; 512]) {
        self.sectors[sector].copy_from_slice(buf);
    }
}

/// A shared in-memory file, the way several mmap'd pages (or a forked
/// child) hold independent handles onto the same underlying bytes.
#[derive(Clone)]
pub struct MockFile(Arc<Mutex<Vec<u8>>>);

impl MockFile {
    pub fn new(data: Vec<u8>) -> Self {
        MockFile(Arc::new(Mutex::new(data)))
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl BackingFile for MockFile {
    fn length(&self) -> u64 {
        self.0.lock().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let data = self.0.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> usize {
        let mut data = self.0.lock();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        buf.len()
    }
}

pub struct MockPlatform;

impl VmPlatform for MockPlatform {
    type Mmu = MockMmu;
    type Frames = MockFrames;
    type Swap = MockSwapDisk;
    type File = MockFile;
}
