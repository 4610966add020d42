use std::{fmt, ptr::NonNull};

use crate::{align, buffer::RawBuffer};

/// Double-ended bump allocator: one cursor grows from the bottom of the
/// buffer, the other shrinks from the top, and allocation fails the moment
/// they would cross.
///
/// ```text
///   base              front          back            base + capacity
///   |                 |              |               |
///   v                 v              v               v
///   +-----------------+--------------+---------------+
///   | front blocks -> |     free     | <- back blocks|
///   +-----------------+--------------+---------------+
/// ```
///
/// There is no per-block release; each side is reclaimed wholesale with
/// [`reset_front`]/[`reset_back`]. That makes the two sides independent
/// scratch arenas: a typical use keeps per-frame data on one side and
/// per-phase data on the other, resetting them on different schedules.
///
/// Blocks are word aligned. The stack never writes to handed-out memory:
/// payloads keep whatever bytes were already in the buffer.
///
/// [`reset_front`]: Self::reset_front
/// [`reset_back`]: Self::reset_back
pub struct BiStack {
    buffer: RawBuffer,
    /// Byte offset of the low-side cursor; grows on `alloc_front`.
    front: usize,
    /// Byte offset of the high-side cursor; shrinks on `alloc_back`.
    back: usize,
}

/// Owns (or exclusively borrows) its buffer, so it can move between
/// threads as a whole.
unsafe impl Send for BiStack {}

impl BiStack {
    /// Builds a stack over a freshly mapped buffer of `len` bytes (rounded
    /// down to a word multiple), returned to the host on drop. A zero
    /// length or failed mapping yields a stack that is already exhausted.
    pub fn with_capacity(len: usize) -> Self {
        Self::from_buffer(RawBuffer::request(len))
    }

    /// Builds a stack over a caller-supplied buffer; never frees it.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes for its whole length, and
    /// nobody else may read, write or free it while the stack is alive.
    pub unsafe fn from_raw_buffer(buf: NonNull<[u8]>) -> Self {
        Self::from_buffer(RawBuffer::from_raw(buf))
    }

    fn from_buffer(buffer: RawBuffer) -> Self {
        Self {
            front: 0,
            back: buffer.capacity(),
            buffer,
        }
    }

    /// Normalized buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Bumps a block of `size` bytes off the low side. The front cursor
    /// only ever moves up until [`reset_front`](Self::reset_front).
    pub fn alloc_front(&mut self, size: usize) -> Option<NonNull<[u8]>> {
        let aligned = align::align_up(size)?;

        if aligned > self.back - self.front {
            return None;
        }

        let block = unsafe { self.buffer.at(self.front) };
        self.front += aligned;

        Some(NonNull::slice_from_raw_parts(block, size))
    }

    /// Bumps a block of `size` bytes off the high side. The back cursor
    /// only ever moves down until [`reset_back`](Self::reset_back).
    pub fn alloc_back(&mut self, size: usize) -> Option<NonNull<[u8]>> {
        let aligned = align::align_up(size)?;

        if aligned > self.back - self.front {
            return None;
        }

        self.back -= aligned;
        let block = unsafe { self.buffer.at(self.back) };

        Some(NonNull::slice_from_raw_parts(block, size))
    }

    /// Reclaims every front block at once. Back blocks stay where they
    /// are.
    #[inline]
    pub fn reset_front(&mut self) {
        self.front = 0;
    }

    /// Reclaims every back block at once. Front blocks stay where they
    /// are.
    #[inline]
    pub fn reset_back(&mut self) {
        self.back = self.buffer.capacity();
    }

    /// Reclaims the entire buffer.
    #[inline]
    pub fn reset_all(&mut self) {
        self.reset_front();
        self.reset_back();
    }

    /// Bytes left between the two cursors. Non-positive means exhausted;
    /// with word-aligned bumping the value bottoms out at exactly 0.
    #[inline]
    pub fn margins(&self) -> isize {
        (self.back - self.front) as isize
    }
}

impl fmt::Debug for BiStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiStack")
            .field("capacity", &self.capacity())
            .field("front", &self.front)
            .field("back", &self.back)
            .finish()
    }
}
