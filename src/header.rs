use std::{mem, ptr::NonNull};

use crate::freelist::FreeListNode;

/// Block header size in bytes. One machine word.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Smallest total block size the pool will ever carve. A freed block has to
/// fit its header plus the two free list links that get written into the
/// payload, so anything smaller could never be released safely. Requests
/// below this are rounded up at allocation.
pub(crate) const MIN_BLOCK_SIZE: usize = BLOCK_HEADER_SIZE + mem::size_of::<FreeListNode>();

/// In-band metadata preceding every block carved from a [`crate::VarPool`]
/// buffer. The header records the total block size, itself included, which
/// is all the pool needs to route a freed block back to its size class.
/// This is how a block looks in memory:
///
/// ```text
/// +--------------------+
/// | total size         | <- BlockHeader, one word.
/// +--------------------+
/// | payload            | <- Address handed to the caller. While the block
/// |   ...              |    is on a free list, the first two words hold a
/// |   ...              |    FreeListNode instead of caller data.
/// +--------------------+
/// ```
///
/// The header is word sized and always written at a word-aligned address,
/// so the payload address right after it is word aligned too.
pub(crate) struct BlockHeader {
    /// Total block size in bytes, header included.
    total: usize,
}

impl BlockHeader {
    pub fn new(total: usize) -> Self {
        Self { total }
    }

    /// Total block size including the header itself.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Usable payload size, header excluded.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.total - BLOCK_HEADER_SIZE
    }

    /// Returns a pointer to the [`BlockHeader`] given the payload address
    /// right after it.
    ///
    /// # Safety
    ///
    /// `address` must point exactly to the first byte after a valid header.
    /// Callers hand us back addresses we previously issued, so as long as
    /// that holds this is safe.
    #[inline]
    pub unsafe fn from_payload_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// Returns the payload address right after `header`.
    ///
    /// # Notes
    ///
    /// Used as `BlockHeader::payload_address_of(header)` rather than a
    /// method on `self` to avoid creating intermediary references that
    /// would upset Miri's stacked borrows checks.
    #[inline]
    pub unsafe fn payload_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().offset(1)).cast()
    }

    /// Returns the block header that owns a free list node. The free list
    /// links live at the start of the freed payload, so this is just
    /// [`Self::from_payload_address`] in disguise.
    #[inline]
    pub unsafe fn from_free_node(node: NonNull<FreeListNode>) -> NonNull<Self> {
        Self::from_payload_address(node.cast())
    }
}
