//! Three allocators that live inside one contiguous byte buffer. None of them
//! talks to the system allocator on the allocation fast path; the buffer is
//! either mapped once at construction or supplied by the caller, and from
//! then on every block is carved out of it.
//!
//! - [`VarPool`] serves requests of any size. Freed blocks land on
//!   segregated exact-size free lists and fresh blocks are bumped off the
//!   untouched end of the buffer, so both allocation and release are cheap.
//! - [`FixedPool`] serves one size only. Freed cells form an intrusive LIFO
//!   chain through their own first word, which makes alloc and free a couple
//!   of pointer moves.
//! - [`BiStack`] bumps from both ends of the buffer toward the middle and
//!   only ever frees by resetting a whole side.
//!
//! Blocks from one allocator must never be handed to another. None of the
//! allocators is thread safe; wrap an instance in a lock if you need to
//! share it.
//!
//! ```rust
//! use bufalloc::VarPool;
//!
//! let mut pool = VarPool::with_capacity(1024);
//!
//! let block = pool.alloc(64).unwrap();
//! // The pool can hand out more space than requested.
//! assert!(block.len() >= 64);
//!
//! unsafe { pool.free(Some(block)) };
//! ```

use std::ptr::NonNull;

mod align;
mod bistack;
mod buffer;
mod fixedpool;
mod freelist;
mod header;
mod list;
mod platform;
mod varpool;

/// Non-null pointer to `T`. We use this in most places instead of `*mut T`
/// so the compiler forces us to handle the `None` case explicitly.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use bistack::BiStack;
pub use fixedpool::FixedPool;
pub use varpool::VarPool;
