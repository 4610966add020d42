use std::{fmt, mem, ptr::NonNull};

use crate::{align, buffer::RawBuffer, Pointer};

/// Link written into the first word of a freed cell. The chain of these is
/// the entire bookkeeping of the pool: no headers, no side tables.
struct FreeCell {
    next: Pointer<FreeCell>,
}

/// One-size allocator over an array of cells carved from a single buffer.
///
/// Cells start out in an untouched tail region and are consumed in order;
/// freed cells form an intrusive LIFO chain threaded through their own
/// first word. A cell is always in exactly one of three places: owned by
/// the caller, linked into the freed chain, or still untouched past the
/// `next_fresh` boundary.
///
/// ```text
///   base                                              end
///   |                                                 |
///   v                                                 v
///   +--------+--------+--------+--------+--------+----+
///   | live   | freed  | live   | freed  |    untouched|
///   +--------+---|----+--------+---^----+--------+----+
///                |                 |             ^
///                +-----------------+             |
///            freed chain, most recent first      next_fresh
/// ```
///
/// Allocation pops the chain if it can and consumes a fresh cell
/// otherwise, so both paths are a handful of instructions. Cell contents
/// are **not** zeroed; callers get whatever bytes were there before.
///
/// The requested cell size is rounded up to a word multiple of at least
/// one pointer, which is what makes writing the intrusive link into a
/// freed cell legal.
pub struct FixedPool {
    buffer: RawBuffer,
    cell_size: usize,
    cell_count: usize,
    /// Cells not currently owned by the caller, freed chain and untouched
    /// tail combined.
    free_count: usize,
    /// Head of the freed chain, most recently freed cell first.
    freed: Pointer<FreeCell>,
    /// Index of the first cell that has never been handed out. Cells at
    /// `next_fresh..cell_count` are untouched.
    next_fresh: usize,
}

/// Owns (or exclusively borrows) its buffer, so it can move between
/// threads as a whole.
unsafe impl Send for FixedPool {}

impl FixedPool {
    /// Builds a pool of `count` cells of at least `obj_size` bytes each
    /// over a freshly mapped buffer, returned to the host on drop.
    ///
    /// Zero sizes, zero counts or a failed mapping produce an inert pool:
    /// every [`alloc`](Self::alloc) returns `None` and
    /// [`free_cells`](Self::free_cells) reports 0.
    pub fn with_cells(obj_size: usize, count: usize) -> Self {
        let Some(cell_size) = Self::cell_size_for(obj_size) else {
            return Self::inert();
        };

        let Some(len) = cell_size.checked_mul(count) else {
            return Self::inert();
        };

        Self::from_buffer(RawBuffer::request(len), cell_size)
    }

    /// Builds a pool over a caller-supplied buffer; the cell count is
    /// however many rounded cells fit the normalized buffer. The pool
    /// never frees the memory.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes for its whole length, and
    /// nobody else may read, write or free it while the pool is alive.
    pub unsafe fn from_raw_buffer(buf: NonNull<[u8]>, obj_size: usize) -> Self {
        let Some(cell_size) = Self::cell_size_for(obj_size) else {
            return Self::inert();
        };

        Self::from_buffer(RawBuffer::from_raw(buf), cell_size)
    }

    /// Effective cell size for a requested object size: at least one
    /// pointer, rounded up to a word multiple so every cell starts word
    /// aligned. `None` for a zero request.
    fn cell_size_for(obj_size: usize) -> Option<usize> {
        if obj_size == 0 {
            return None;
        }

        align::align_up(obj_size.max(mem::size_of::<FreeCell>()))
    }

    fn from_buffer(buffer: RawBuffer, cell_size: usize) -> Self {
        let cell_count = buffer.capacity() / cell_size;

        if cell_count == 0 {
            return Self::inert();
        }

        Self {
            buffer,
            cell_size,
            cell_count,
            free_count: cell_count,
            freed: None,
            next_fresh: 0,
        }
    }

    fn inert() -> Self {
        Self {
            buffer: RawBuffer::empty(),
            cell_size: mem::size_of::<FreeCell>(),
            cell_count: 0,
            free_count: 0,
            freed: None,
            next_fresh: 0,
        }
    }

    /// Effective cell size in bytes.
    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Total number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Cells currently available, freed and untouched combined.
    #[inline]
    pub fn free_cells(&self) -> usize {
        self.free_count
    }

    /// Hands out one cell, preferring the most recently freed one.
    /// Contents are whatever was left there; nothing is zeroed. `None`
    /// when every cell is owned by the caller.
    pub fn alloc(&mut self) -> Option<NonNull<[u8]>> {
        if let Some(cell) = self.freed {
            self.freed = unsafe { cell.as_ref().next };
            self.free_count -= 1;
            return Some(NonNull::slice_from_raw_parts(cell.cast(), self.cell_size));
        }

        if self.next_fresh < self.cell_count {
            let cell = unsafe { self.buffer.at(self.next_fresh * self.cell_size) };
            self.next_fresh += 1;
            self.free_count -= 1;
            return Some(NonNull::slice_from_raw_parts(cell, self.cell_size));
        }

        None
    }

    /// Pushes `cell` onto the freed chain. Total: `None`, pointers outside
    /// the cell array, pointers not on a cell boundary and cells that were
    /// never handed out are all ignored.
    ///
    /// # Safety
    ///
    /// If the pointer is a cell of this pool, it must have been returned
    /// by [`alloc`](Self::alloc) and not freed since. Anything else is
    /// ignored.
    pub unsafe fn free(&mut self, cell: Option<NonNull<[u8]>>) {
        let Some(cell) = cell else { return };

        if self.buffer.is_empty() {
            return;
        }

        let addr = cell.cast::<u8>().as_ptr() as usize;
        let base = self.buffer.base_addr();
        let end = base + self.cell_count * self.cell_size;

        if addr < base || addr >= end {
            return;
        }

        let offset = addr - base;
        if offset % self.cell_size != 0 {
            return;
        }

        // A cell past the fresh boundary was never allocated, so it can't
        // be freed.
        if offset / self.cell_size >= self.next_fresh {
            return;
        }

        let link = cell.cast::<FreeCell>();
        link.as_ptr().write(FreeCell { next: self.freed });
        self.freed = Some(link);
        self.free_count += 1;
    }

    /// Frees `*cell` and nulls it out so the caller can't use it again.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free).
    pub unsafe fn cleanup(&mut self, cell: &mut Option<NonNull<[u8]>>) {
        self.free(cell.take());
    }
}

impl fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("cell_size", &self.cell_size)
            .field("cell_count", &self.cell_count)
            .field("free_cells", &self.free_count)
            .finish()
    }
}
