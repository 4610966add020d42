use std::ptr::NonNull;

use crate::{align, platform};

/// Backing storage of an allocator: one contiguous byte range plus the
/// knowledge of how it was obtained. The base is always word aligned and
/// the capacity is always a word multiple; construction normalizes both so
/// the allocators never have to re-check alignment of their own carving.
///
/// An allocator constructed from unusable arguments holds the [`empty`]
/// buffer: capacity zero, nothing to release. Every operation on such an
/// allocator fails cleanly, which is how invalid construction is reported.
///
/// [`empty`]: RawBuffer::empty
pub(crate) struct RawBuffer {
    base: NonNull<u8>,
    capacity: usize,
    ownership: Ownership,
}

enum Ownership {
    /// Obtained from [`platform::request_memory`]; `mapped` is the exact
    /// length to hand back, which may exceed the normalized capacity.
    Owned { mapped: usize },
    /// Supplied by the caller, who keeps it alive and never touches it
    /// while we hold it. Dropping the buffer is a no-op.
    Borrowed,
}

impl RawBuffer {
    /// The degenerate buffer. Not an error value by itself; allocators hand
    /// it out when construction arguments can't produce a usable pool.
    pub fn empty() -> Self {
        Self {
            base: NonNull::dangling(),
            capacity: 0,
            ownership: Ownership::Borrowed,
        }
    }

    /// Requests `len` bytes from the host facility. Returns the empty
    /// buffer if `len` is zero or the host refuses.
    pub fn request(len: usize) -> Self {
        if len == 0 {
            return Self::empty();
        }

        match unsafe { platform::request_memory(len) } {
            Some(base) => Self {
                base,
                // Mapped memory is page aligned, so only the length needs
                // normalizing.
                capacity: len & !(align::WORD_SIZE - 1),
                ownership: Ownership::Owned { mapped: len },
            },
            None => Self::empty(),
        }
    }

    /// Adopts a caller-supplied buffer without taking ownership of its
    /// memory. The base is aligned up to the word size and the capacity
    /// rounded down, so up to `2 * WORD_SIZE - 1` bytes of the original
    /// buffer may go unused.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes for its whole length and
    /// must not be read, written or freed by anyone else for as long as the
    /// returned buffer (and the allocator owning it) is alive.
    pub unsafe fn from_raw(buf: NonNull<[u8]>) -> Self {
        let start = buf.cast::<u8>().as_ptr();

        let Some(aligned) = align::align_addr_up(start as usize) else {
            return Self::empty();
        };

        let skip = aligned - start as usize;
        if buf.len() < skip {
            return Self::empty();
        }

        let capacity = (buf.len() - skip) & !(align::WORD_SIZE - 1);
        if capacity == 0 {
            return Self::empty();
        }

        Self {
            base: NonNull::new_unchecked(start.add(skip)),
            capacity,
            ownership: Ownership::Borrowed,
        }
    }

    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn end_addr(&self) -> usize {
        self.base_addr() + self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    /// Address `offset` bytes into the buffer.
    ///
    /// # Safety
    ///
    /// `offset` must not exceed the capacity.
    #[inline]
    pub unsafe fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.capacity);
        NonNull::new_unchecked(self.base.as_ptr().add(offset))
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if let Ownership::Owned { mapped } = self.ownership {
            unsafe { platform::return_memory(self.base, mapped) };
        }
    }
}
