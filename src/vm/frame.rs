//! Physical frame allocation boundary.
//!
//! Grounded in `vm.c`'s `vm_get_frame`/`palloc_get_page(PAL_USER)`: the
//! core only ever needs "give me a frame" and "I'm done with this frame",
//! never the allocator's internals, so it's expressed as a trait an outer
//! kernel's page allocator implements (see `atomic_os::memory::frame_allocator`
//! for the kind of bump/bitmap allocator that would sit behind it).

use core::fmt;

/// Identifies one physical page frame. Opaque to this crate: the concrete
/// value (a physical address, an index into a frame array, ...) is up to
/// the `FrameSource` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame({})", self.0)
    }
}

/// A claimed physical frame's raw byte contents, addressed the way the
/// swap and file-backed code needs to read/write a full page at a time.
pub struct Frame<'a> {
    pub id: FrameId,
    pub bytes: &'a mut [u8],
}

/// Source of zeroed physical frames. Grounded in `vm_get_frame`'s call
/// into `palloc_get_page`.
pub trait FrameSource {
    /// Claim a free frame, or `None` if none remain (the caller is
    /// expected to evict something and retry).
    fn alloc(&mut self) -> Option<FrameId>;

    fn free(&mut self, frame: FrameId);

    /// Borrow a claimed frame's contents for reading or writing.
    fn bytes_mut(&mut self, frame: FrameId) -> &mut [u8];

    fn bytes(&self, frame: FrameId) -> &[u8];
}
