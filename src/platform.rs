use std::ptr::NonNull;

use crate::Pointer;

/// Abstraction over the host memory facility. Owning-mode allocators only
/// need to obtain one buffer at construction and give it back on drop; they
/// don't care which kernel API provides it.
trait HostMemory {
    /// Requests a buffer from the host where `length` bytes can be written
    /// safely.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Returns `length` bytes starting at `address` to the host. `length`
    /// must be the exact value the buffer was requested with.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);
}

/// Zero sized type that implements [`HostMemory`] for each platform.
pub(crate) struct Platform;

/// Convenience wrapper for [`HostMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Pointer<u8> {
    Platform::request_memory(length)
}

/// Convenience wrapper for [`HostMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{HostMemory, Platform};
    use crate::Pointer;

    impl HostMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Read-Write, private to this process, not backed by any file.
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            let address = libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0);

            if address == libc::MAP_FAILED {
                None
            } else {
                Some(NonNull::new_unchecked(address).cast())
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // The region is still mapped at this point, but there's no
                // caller left to report the failure to.
            }
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::ptr::NonNull;

    use windows::Win32::System::Memory;

    use super::{HostMemory, Platform};
    use crate::Pointer;

    impl HostMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Unlike mmap, memory has to be both reserved and committed to
            // become usable; one call can do both.
            let protection = Memory::PAGE_READWRITE;
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, _length: usize) {
            // MEM_RELEASE requires a length of zero and releases the whole
            // reservation made by VirtualAlloc.
            let address = address.cast().as_ptr();

            if !Memory::VirtualFree(address, 0, Memory::MEM_RELEASE).as_bool() {
                // Same situation as munmap above.
            }
        }
    }
}

#[cfg(miri)]
mod miri {
    //! Miri has no FFI support, so under it we route buffer requests through
    //! the global allocator instead of the kernel. As a bonus, Miri will
    //! flag owning-mode buffers that are never returned.

    use std::{alloc, ptr::NonNull};

    use super::{HostMemory, Platform};
    use crate::{align::WORD_SIZE, Pointer};

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, WORD_SIZE).unwrap()
    }

    impl HostMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(to_layout(length)))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }
    }
}
