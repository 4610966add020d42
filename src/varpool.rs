use std::{fmt, ptr::NonNull};

use crate::{
    align,
    buffer::RawBuffer,
    freelist::FreeList,
    header::{BlockHeader, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE},
    Pointer,
};

/// Size-class granularity in bytes. Bucket `k` holds freed blocks whose
/// total size falls in `[(k + 1) * GRANULARITY, (k + 2) * GRANULARITY)`;
/// everything past the last bucket goes to the oversize list.
pub(crate) const GRANULARITY: usize = MIN_BLOCK_SIZE;

/// Arbitrary-size allocator over a single contiguous buffer. Two mechanisms
/// cooperate:
///
/// - A **bump region**: the untouched span `[base, cursor)` of the buffer.
///   Fresh blocks are carved off its top, so the cursor starts at
///   `base + capacity` and moves toward `base`, one block at a time.
/// - **Segregated free lists**: `B` buckets of linearly growing size
///   classes plus one oversize list. Freeing a block pushes it onto the
///   head of its class; allocating scans that class for an exact size
///   match before touching the bump region.
///
/// ```text
///   base                cursor                                 base + capacity
///   |                   |                                      |
///   v                   v                                      v
///   +-------------------+--------+-----+--------------+-------+
///   |   bump region     | block  | blk |    block     | block |
///   +-------------------+--------+-----+--------------+-------+
///                        ^              ^
///                        |              |
///             most recent allocation    freed, linked into its bucket
/// ```
///
/// Blocks are never split and never coalesced. A freed block keeps its size
/// forever and can only be reissued for a request that rounds to exactly
/// that size (oversize blocks may also serve smaller oversize requests
/// whole). In exchange, reuse is deterministic: free a block, allocate the
/// same size, and you get the same address back.
///
/// Every allocation is zeroed before it is handed out. Release is total:
/// null and foreign pointers are ignored instead of reported.
///
/// Not thread safe; operations take `&mut self`.
pub struct VarPool<const B: usize = 12> {
    buffer: RawBuffer,
    /// Offset of the bump cursor from the buffer base. The bump region is
    /// `[0, cursor)`; every carved block lives in `[cursor, capacity)`.
    cursor: usize,
    /// Size-class free lists.
    buckets: [FreeList; B],
    /// Freed blocks too large for any bucket.
    large: FreeList,
}

/// The pool owns (or exclusively borrows) its buffer, so it can move to
/// another thread as a whole.
unsafe impl<const B: usize> Send for VarPool<B> {}

impl VarPool {
    /// Builds a pool with the default bucket configuration over a freshly
    /// mapped buffer of `capacity` bytes (rounded down to a word
    /// multiple). The buffer is returned to the host when the pool is
    /// dropped.
    ///
    /// A capacity too small for even one minimum-size block produces a pool
    /// on which every allocation fails and [`free_space`] reports 0.
    ///
    /// [`free_space`]: Self::free_space
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_buckets(capacity)
    }

    /// Builds a pool with the default bucket configuration over a
    /// caller-supplied buffer. The base is aligned up and the length
    /// rounded down to word multiples; the pool never frees the memory.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes for its whole length, and
    /// nobody else may read, write or free it while the pool is alive.
    pub unsafe fn from_raw_buffer(buf: NonNull<[u8]>) -> Self {
        Self::from_raw_buffer_with_buckets(buf)
    }
}

impl<const B: usize> VarPool<B> {
    /// Same as [`VarPool::with_capacity`] but with `B` size-class buckets
    /// instead of the default 12. More buckets push the oversize boundary
    /// up; fewer make the oversize list do more work.
    pub fn with_buckets(capacity: usize) -> Self {
        Self::from_buffer(RawBuffer::request(capacity))
    }

    /// Same as [`VarPool::from_raw_buffer`] but with `B` size-class
    /// buckets instead of the default 12.
    ///
    /// # Safety
    ///
    /// Same contract as [`VarPool::from_raw_buffer`].
    pub unsafe fn from_raw_buffer_with_buckets(buf: NonNull<[u8]>) -> Self {
        Self::from_buffer(RawBuffer::from_raw(buf))
    }

    fn from_buffer(buffer: RawBuffer) -> Self {
        let buffer = if buffer.capacity() < MIN_BLOCK_SIZE {
            RawBuffer::empty()
        } else {
            buffer
        };

        const EMPTY: FreeList = FreeList::new();

        Self {
            cursor: buffer.capacity(),
            buffer,
            buckets: [EMPTY; B],
            large: EMPTY,
        }
    }

    /// Normalized buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Total block size a request for `size` user bytes rounds to: header
    /// plus payload, word aligned, never below the minimum block size.
    fn block_size_for(size: usize) -> Option<usize> {
        let total = align::align_up(size.checked_add(BLOCK_HEADER_SIZE)?)?;
        Some(total.max(MIN_BLOCK_SIZE))
    }

    /// Bucket index for a total block size, or `None` if the block belongs
    /// on the oversize list. `total` is always at least [`GRANULARITY`].
    fn bucket_index(total: usize) -> Option<usize> {
        let class = total / GRANULARITY - 1;
        (class < B).then_some(class)
    }

    /// The free list a block of `total` bytes lives on.
    fn list_for(&mut self, total: usize) -> &mut FreeList {
        match Self::bucket_index(total) {
            Some(class) => &mut self.buckets[class],
            None => &mut self.large,
        }
    }

    /// Allocates a zeroed, word-aligned block of at least `size` bytes.
    /// The returned slice covers the whole usable payload, which may be
    /// larger than requested. Returns `None` when no block can satisfy the
    /// request; freeing makes retrying worthwhile.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<[u8]>> {
        let total = Self::block_size_for(size)?;

        unsafe {
            // Reuse an exact-size block from its class, most recently freed
            // first.
            let list = self.list_for(total);
            if let Some(block) = list.find_exact(total) {
                list.remove_block(block);
                return Some(self.issue(block));
            }

            // Carve a fresh block off the top of the bump region.
            if total <= self.cursor {
                self.cursor -= total;
                let block = self.buffer.at(self.cursor).cast::<BlockHeader>();
                block.as_ptr().write(BlockHeader::new(total));
                return Some(self.issue(block));
            }

            // Oversize requests may take a larger freed block whole. There
            // is no splitting, so the caller simply gets the extra bytes.
            if Self::bucket_index(total).is_none() {
                if let Some(block) = self.large.find_at_least(total) {
                    self.large.remove_block(block);
                    return Some(self.issue(block));
                }
            }
        }

        None
    }

    /// Zeroes the payload of `block` and wraps it for the caller.
    unsafe fn issue(&self, block: NonNull<BlockHeader>) -> NonNull<[u8]> {
        let payload = BlockHeader::payload_address_of(block);
        let len = block.as_ref().payload_size();
        payload.as_ptr().write_bytes(0, len);
        NonNull::slice_from_raw_parts(payload, len)
    }

    /// Resizes `block` to at least `size` bytes, preserving the payload up
    /// to `min(old payload, size)`. `None` input behaves like [`alloc`].
    /// If the rounded new size already fits the block, the block is
    /// returned unchanged (shrinking never moves). On failure the original
    /// block is untouched and `None` is returned; bytes past the preserved
    /// prefix carry no guarantee.
    ///
    /// # Safety
    ///
    /// `block` must be `None` or a block previously returned by this pool
    /// and not freed since.
    ///
    /// [`alloc`]: Self::alloc
    pub unsafe fn realloc(
        &mut self,
        block: Option<NonNull<[u8]>>,
        size: usize,
    ) -> Option<NonNull<[u8]>> {
        let Some(old) = block else {
            return self.alloc(size);
        };

        let payload = old.cast::<u8>();
        let header = self.checked_header_of(payload)?;
        let old_payload = header.as_ref().payload_size();
        let new_total = Self::block_size_for(size)?;

        if new_total <= header.as_ref().total_size() {
            return Some(NonNull::slice_from_raw_parts(payload, old_payload));
        }

        let new_block = self.alloc(size)?;
        let preserved = old_payload.min(size);
        new_block
            .cast::<u8>()
            .as_ptr()
            .copy_from_nonoverlapping(payload.as_ptr(), preserved);
        self.free(Some(old));

        Some(new_block)
    }

    /// Returns `block` to the free list of its size class. Total by design:
    /// `None`, pointers outside the buffer, misaligned pointers and
    /// pointers whose header bytes are implausible are all ignored.
    ///
    /// # Safety
    ///
    /// If the pointer lies inside the carved part of the buffer it must be
    /// a payload address previously returned by this pool and not freed
    /// since. Anything else (null, foreign pointers, out-of-range garbage)
    /// is fine and gets ignored.
    pub unsafe fn free(&mut self, block: Option<NonNull<[u8]>>) {
        let Some(block) = block else { return };

        let Some(header) = self.checked_header_of(block.cast::<u8>()) else {
            return;
        };

        let total = header.as_ref().total_size();
        self.list_for(total).push_block(header);
    }

    /// Frees `*block` and nulls it out so the caller can't use it again.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free).
    pub unsafe fn cleanup(&mut self, block: &mut Option<NonNull<[u8]>>) {
        self.free(block.take());
    }

    /// Validates a payload pointer and recovers its header. Rejects
    /// anything that provably can't be a live block of this pool: pointers
    /// outside the carved span `[cursor, capacity)`, misaligned pointers,
    /// and headers whose recorded size couldn't fit where the block sits.
    fn checked_header_of(&self, payload: NonNull<u8>) -> Pointer<BlockHeader> {
        if self.buffer.is_empty() {
            return None;
        }

        let addr = payload.as_ptr() as usize;

        if !align::is_word_aligned(addr) {
            return None;
        }

        // Payloads start one header past the block start; blocks only
        // exist between the cursor and the end of the buffer.
        let first_valid = self.buffer.base_addr() + self.cursor + BLOCK_HEADER_SIZE;
        if addr < first_valid || addr >= self.buffer.end_addr() {
            return None;
        }

        let header = unsafe { BlockHeader::from_payload_address(payload) };
        let total = unsafe { header.as_ref().total_size() };

        if total < MIN_BLOCK_SIZE || !align::is_word_aligned(total) {
            return None;
        }

        let block_start = addr - BLOCK_HEADER_SIZE;
        match block_start.checked_add(total) {
            Some(end) if end <= self.buffer.end_addr() => Some(header),
            _ => None,
        }
    }

    /// Empties every free list, restores the cursor and zeroes the whole
    /// buffer. Equivalent to a freshly constructed pool over the same
    /// memory; calling it twice in a row is the same as calling it once.
    pub fn reset(&mut self) {
        const EMPTY: FreeList = FreeList::new();

        self.buckets = [EMPTY; B];
        self.large = EMPTY;
        self.cursor = self.buffer.capacity();

        if !self.buffer.is_empty() {
            unsafe {
                self.buffer
                    .base()
                    .as_ptr()
                    .write_bytes(0, self.buffer.capacity());
            }
        }
    }

    /// Bytes available for future allocations: the bump region plus every
    /// free-listed block, headers included. Together with the total sizes
    /// of live blocks this always adds up to the capacity.
    pub fn free_space(&self) -> usize {
        let mut free = self.cursor;

        unsafe {
            for bucket in &self.buckets {
                free += bucket.total_bytes();
            }
            free += self.large.total_bytes();
        }

        free
    }
}

impl<const B: usize> fmt::Debug for VarPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let free_blocks: usize =
            self.buckets.iter().map(FreeList::len).sum::<usize>() + self.large.len();

        f.debug_struct("VarPool")
            .field("capacity", &self.capacity())
            .field("bump_bytes", &self.cursor)
            .field("free_space", &self.free_space())
            .field("free_blocks", &free_blocks)
            .field("buckets", &B)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Total size of the live block behind `block`, header included.
    fn live_total(block: NonNull<[u8]>) -> usize {
        block.len() + BLOCK_HEADER_SIZE
    }

    #[test]
    fn lifo_reuse_of_exact_size() {
        let mut pool = VarPool::with_capacity(1024);

        let p = pool.alloc(16).unwrap();
        unsafe { pool.free(Some(p)) };

        // An allocation of the same rounded size gets the same block back.
        let q = pool.alloc(16).unwrap();
        assert_eq!(q, p);

        // And the most recently freed block wins when several match.
        let a = pool.alloc(16).unwrap();
        unsafe {
            pool.free(Some(q));
            pool.free(Some(a));
        }
        assert_eq!(pool.alloc(16).unwrap(), a);
        assert_eq!(pool.alloc(16).unwrap(), q);
    }

    #[test]
    fn exhaustion_recovers_after_free() {
        let mut pool = VarPool::with_capacity(256);

        let first = pool.alloc(200).unwrap();
        assert!(pool.alloc(200).is_none());

        unsafe { pool.free(Some(first)) };

        let again = pool.alloc(200).unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn blocks_are_carved_from_the_top() {
        let mut storage = [0usize; 128];
        let base = storage.as_mut_ptr() as usize;
        let buf = NonNull::slice_from_raw_parts(
            NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap(),
            128 * align::WORD_SIZE,
        );

        let mut pool = unsafe { VarPool::from_raw_buffer(buf) };
        let capacity = pool.capacity();

        let first = pool.alloc(16).unwrap();
        let second = pool.alloc(16).unwrap();

        // The first block ends exactly at the top of the buffer and the
        // second sits directly below it.
        let first_addr = first.cast::<u8>().as_ptr() as usize;
        let second_addr = second.cast::<u8>().as_ptr() as usize;
        assert_eq!(first_addr + first.len(), base + capacity);
        assert_eq!(second_addr + second.len(), first_addr - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn realloc_preserves_prefix() {
        let mut pool = VarPool::with_capacity(1024);

        let p = pool.alloc(8).unwrap();
        unsafe {
            for (i, byte) in (1..=8u8).enumerate() {
                p.cast::<u8>().as_ptr().add(i).write(byte);
            }

            let q = pool.realloc(Some(p), 64).unwrap();
            assert_ne!(q.cast::<u8>(), p.cast::<u8>());
            assert!(q.len() >= 64);

            for i in 0..8 {
                assert_eq!(*q.cast::<u8>().as_ptr().add(i), (i + 1) as u8);
            }
        }
    }

    #[test]
    fn realloc_shrink_returns_same_block() {
        let mut pool = VarPool::with_capacity(1024);

        let p = pool.alloc(64).unwrap();
        unsafe {
            let q = pool.realloc(Some(p), 8).unwrap();
            assert_eq!(q.cast::<u8>(), p.cast::<u8>());
            assert_eq!(q.len(), p.len());
        }
    }

    #[test]
    fn realloc_none_allocates() {
        let mut pool = VarPool::with_capacity(1024);
        let p = unsafe { pool.realloc(None, 32) }.unwrap();
        assert!(p.len() >= 32);
    }

    #[test]
    fn realloc_failure_keeps_block_valid() {
        let mut pool = VarPool::with_capacity(256);

        let p = pool.alloc(100).unwrap();
        unsafe {
            p.cast::<u8>().as_ptr().write_bytes(0x42, 100);

            // Growing past the remaining space fails and must not disturb
            // the original block.
            assert!(pool.realloc(Some(p), 4096).is_none());

            for i in 0..100 {
                assert_eq!(*p.cast::<u8>().as_ptr().add(i), 0x42);
            }
        }
    }

    #[test]
    fn payloads_are_zeroed() {
        let mut storage = [0xAAu8; 512];
        let buf = NonNull::slice_from_raw_parts(NonNull::new(storage.as_mut_ptr()).unwrap(), 512);

        let mut pool = unsafe { VarPool::from_raw_buffer(buf) };

        let p = pool.alloc(40).unwrap();
        unsafe {
            for i in 0..p.len() {
                assert_eq!(*p.cast::<u8>().as_ptr().add(i), 0);
            }

            // Reuse dirties the payload with free list links; it must come
            // back zeroed again.
            p.cast::<u8>().as_ptr().write_bytes(0x55, p.len());
            pool.free(Some(p));
        }
        let q = pool.alloc(40).unwrap();
        assert_eq!(q, p);
        unsafe {
            for i in 0..q.len() {
                assert_eq!(*q.cast::<u8>().as_ptr().add(i), 0);
            }
        }
    }

    #[test]
    fn conservation_of_bytes() {
        let mut pool = VarPool::with_capacity(2048);
        let capacity = pool.capacity();
        let mut live = Vec::new();

        let check = |pool: &VarPool, live: &Vec<NonNull<[u8]>>| {
            let live_bytes: usize = live.iter().map(|block| live_total(*block)).sum();
            assert_eq!(pool.free_space() + live_bytes, capacity);
        };

        for size in [16, 200, 16, 48, 333, 8] {
            live.push(pool.alloc(size).unwrap());
            check(&pool, &live);
        }

        // Free every other block; freed blocks count toward free_space with
        // their headers included.
        for i in (0..live.len()).step_by(2).rev() {
            unsafe { pool.free(Some(live.remove(i))) };
            check(&pool, &live);
        }

        while let Some(block) = live.pop() {
            unsafe { pool.free(Some(block)) };
            check(&pool, &live);
        }

        assert_eq!(pool.free_space(), capacity);
    }

    #[test]
    fn oversize_blocks_are_taken_whole() {
        let mut pool = VarPool::with_capacity(512);

        // Too big for any bucket with the default configuration.
        let big = pool.alloc(400).unwrap();
        unsafe { pool.free(Some(big)) };

        // A smaller oversize request reuses the whole block, extra bytes
        // included.
        let q = pool.alloc(320).unwrap();
        assert_eq!(q.cast::<u8>(), big.cast::<u8>());
        assert_eq!(q.len(), big.len());
    }

    #[test]
    fn free_ignores_foreign_pointers() {
        let mut pool = VarPool::with_capacity(512);
        let p = pool.alloc(32).unwrap();
        let space = pool.free_space();

        unsafe {
            // Null.
            pool.free(None);

            // Outside the buffer.
            let mut foreign = [0usize; 8];
            let foreign = NonNull::slice_from_raw_parts(
                NonNull::new(foreign.as_mut_ptr().cast::<u8>()).unwrap(),
                64,
            );
            pool.free(Some(foreign));

            // Misaligned interior pointer.
            let skewed = NonNull::slice_from_raw_parts(
                NonNull::new(p.cast::<u8>().as_ptr().add(1)).unwrap(),
                8,
            );
            pool.free(Some(skewed));

            // Inside the untouched bump region.
            let bump = NonNull::slice_from_raw_parts(
                NonNull::new(p.cast::<u8>().as_ptr().sub(64)).unwrap(),
                8,
            );
            pool.free(Some(bump));
        }

        // Nothing was freed and the pool still works.
        assert_eq!(pool.free_space(), space);
        assert!(pool.alloc(32).is_some());
    }

    #[test]
    fn reset_restores_everything() {
        let mut pool = VarPool::with_capacity(1024);
        let capacity = pool.capacity();

        let first = pool.alloc(100).unwrap();
        let _ = pool.alloc(60).unwrap();
        unsafe { pool.free(Some(first)) };

        pool.reset();
        assert_eq!(pool.free_space(), capacity);

        // Idempotent.
        pool.reset();
        assert_eq!(pool.free_space(), capacity);

        // The cursor is back at the top: allocation starts at the same
        // address a fresh pool would use.
        let after = pool.alloc(100).unwrap();
        assert_eq!(after, first);
    }

    #[test]
    fn cleanup_nulls_the_slot() {
        let mut pool = VarPool::with_capacity(256);
        let mut slot = pool.alloc(16);
        assert!(slot.is_some());

        unsafe { pool.cleanup(&mut slot) };
        assert!(slot.is_none());

        // Freeing through the nulled slot again is a no-op.
        unsafe { pool.cleanup(&mut slot) };
        assert!(slot.is_none());
    }

    #[test]
    fn invalid_construction_yields_inert_pool() {
        let mut pool = VarPool::with_capacity(0);
        assert_eq!(pool.free_space(), 0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.alloc(1).is_none());
        assert!(pool.alloc(0).is_none());

        // A borrowed buffer smaller than one block behaves the same.
        let mut tiny = [0u8; 8];
        let buf = NonNull::slice_from_raw_parts(NonNull::new(tiny.as_mut_ptr()).unwrap(), 8);
        let mut pool = unsafe { VarPool::from_raw_buffer(buf) };
        assert_eq!(pool.free_space(), 0);
        assert!(pool.alloc(1).is_none());
    }

    #[test]
    fn custom_bucket_count() {
        // With only two buckets everything past 3 * GRANULARITY total bytes
        // is oversize, yet behavior stays the same.
        let mut pool = VarPool::<2>::with_buckets(1024);

        let p = pool.alloc(GRANULARITY * 4).unwrap();
        unsafe { pool.free(Some(p)) };
        let q = pool.alloc(GRANULARITY * 4).unwrap();
        assert_eq!(q, p);
    }
}
