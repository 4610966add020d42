use std::ptr::NonNull;

use crate::{
    header::BlockHeader,
    list::{LinkedList, Node},
    Pointer,
};

/// When a block is free we reuse its payload to store the free list links,
/// that is, a doubly linked list of _only_ free blocks. This is how a free
/// block looks in memory:
///
/// ```text
/// +----------------------------+
/// | total size                 | <- BlockHeader
/// +----------------------------+
/// | pointer to next free block | <--+
/// +----------------------------+    | Node<()> written into the payload.
/// | pointer to prev free block | <--+
/// +----------------------------+
/// | rest of the payload        | <- Leftover bytes, possibly none. Zeroed
/// |          ......            |    again before the block is reissued.
/// +----------------------------+
/// ```
///
/// Giving [`Node<T>`] a zero sized `T` lets us reuse the whole linked list
/// implementation without any extra metadata: everything else we need (the
/// block size) already sits in the header right above the node. The catch is
/// that the list points at block *payloads*, not at block headers, so
/// whenever we need the actual header we step back one header size, see
/// [`BlockHeader::from_free_node`].
///
/// Storing anything in the payload of a freed block is fine because the
/// caller gave the block back; if they kept pointers into it they are in
/// use-after-free territory and on their own.
pub(crate) type FreeListNode = Node<()>;

/// See [`FreeListNode`].
pub(crate) type FreeList = LinkedList<()>;

impl FreeList {
    /// Threads `block` onto the head of the list. Freed blocks are pushed
    /// and searched from the head, which is what gives the pool its LIFO
    /// reuse order.
    ///
    /// # Safety
    ///
    /// `block` must be a valid header of a block that is not currently on
    /// any list and whose payload is unused.
    pub unsafe fn push_block(&mut self, block: NonNull<BlockHeader>) {
        self.push_front((), BlockHeader::payload_address_of(block));
    }

    /// Unlinks `block` from the list.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into `self`.
    pub unsafe fn remove_block(&mut self, block: NonNull<BlockHeader>) {
        self.remove(BlockHeader::payload_address_of(block).cast());
    }

    /// First block whose total size is exactly `total`, scanning from the
    /// most recently freed.
    ///
    /// # Safety
    ///
    /// All linked nodes must be valid.
    pub unsafe fn find_exact(&self, total: usize) -> Pointer<BlockHeader> {
        let mut current = self.first();

        while let Some(node) = current {
            let block = BlockHeader::from_free_node(node);

            if block.as_ref().total_size() == total {
                return Some(block);
            }

            current = node.as_ref().next;
        }

        None
    }

    /// First block whose total size is at least `total`. Used by oversized
    /// requests that may take a larger block whole.
    ///
    /// # Safety
    ///
    /// All linked nodes must be valid.
    pub unsafe fn find_at_least(&self, total: usize) -> Pointer<BlockHeader> {
        let mut current = self.first();

        while let Some(node) = current {
            let block = BlockHeader::from_free_node(node);

            if block.as_ref().total_size() >= total {
                return Some(block);
            }

            current = node.as_ref().next;
        }

        None
    }

    /// Sum of the total sizes of every block on the list, headers included.
    ///
    /// # Safety
    ///
    /// All linked nodes must be valid.
    pub unsafe fn total_bytes(&self) -> usize {
        self.iter()
            .map(|node| BlockHeader::from_free_node(node).as_ref().total_size())
            .sum()
    }
}
