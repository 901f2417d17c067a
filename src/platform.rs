use crate::Pointer;

/// Abstraction over the data-segment break primitive. The allocator only
/// ever asks for two things: push the break up by some bytes and hand back
/// the old break, or pull it down. How that maps onto the underlying kernel
/// is this module's problem.
trait PlatformSpecificBreak {
    /// Grows the segment by `bytes` and returns the old break, i.e. the
    /// first byte of the newly usable region. `None` if the kernel refuses.
    unsafe fn expand(bytes: usize) -> Pointer<u8>;

    /// Shrinks the segment by `bytes`. Returns whether the kernel accepted.
    unsafe fn contract(bytes: usize) -> bool;
}

/// Zero sized type that implements [`PlatformSpecificBreak`] for each OS.
struct Platform;

/// Convenience wrapper for [`PlatformSpecificBreak::expand`].
#[inline]
pub(crate) unsafe fn expand(bytes: usize) -> Pointer<u8> {
    Platform::expand(bytes)
}

/// Convenience wrapper for [`PlatformSpecificBreak::contract`].
#[inline]
pub(crate) unsafe fn contract(bytes: usize) -> bool {
    Platform::contract(bytes)
}

#[cfg(unix)]
mod unix {
    use std::ptr::NonNull;

    use libc;

    use super::{Platform, PlatformSpecificBreak};
    use crate::Pointer;

    impl PlatformSpecificBreak for Platform {
        unsafe fn expand(bytes: usize) -> Pointer<u8> {
            if bytes > libc::intptr_t::MAX as usize {
                return None;
            }

            // See https://man7.org/linux/man-pages/man2/sbrk.2.html. On
            // success the old break comes back; on failure, (void *) -1.
            match libc::sbrk(bytes as libc::intptr_t) {
                failed if failed as usize == usize::MAX => None,
                old_break => Some(NonNull::new_unchecked(old_break).cast()),
            }
        }

        unsafe fn contract(bytes: usize) -> bool {
            if bytes > libc::intptr_t::MAX as usize {
                return false;
            }

            libc::sbrk(-(bytes as libc::intptr_t)) as usize != usize::MAX
        }
    }
}

#[cfg(windows)]
mod windows {
    //! Windows has no program break, so we build one: reserve a large span
    //! of address space once, then commit pages as the break moves up and
    //! decommit them as it moves down. The monotonic-segment contract the
    //! allocator relies on (growth is contiguous, the old break is the start
    //! of the new region) holds exactly.

    use std::{
        mem::MaybeUninit,
        ptr::NonNull,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformSpecificBreak};
    use crate::Pointer;

    /// Address space reserved up front (16 GiB, or 1 GiB on 32 bit
    /// targets). Only committed pages consume memory.
    const RESERVATION: usize = 1 << if usize::BITS >= 64 { 34 } else { 30 };

    /// Base of the reservation. Zero until the first expand.
    static BASE: AtomicUsize = AtomicUsize::new(0);

    /// Current break as an offset from [`BASE`]. All accesses happen under
    /// the allocator lock, the atomics only exist to avoid `static mut`.
    static BREAK: AtomicUsize = AtomicUsize::new(0);

    /// Virtual memory page size, cached after the first query.
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    unsafe fn page_size() -> usize {
        let mut size = PAGE_SIZE.load(Ordering::Relaxed);

        if size == 0 {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
            size = system_info.assume_init().dwPageSize as usize;
            PAGE_SIZE.store(size, Ordering::Relaxed);
        }

        size
    }

    fn round_to_pages(bytes: usize, page: usize) -> usize {
        (bytes + page - 1) & !(page - 1)
    }

    unsafe fn reservation_base() -> Option<usize> {
        let base = BASE.load(Ordering::Relaxed);
        if base != 0 {
            return Some(base);
        }

        let address = Memory::VirtualAlloc(
            None,
            RESERVATION,
            Memory::MEM_RESERVE,
            Memory::PAGE_NOACCESS,
        );

        if address.is_null() {
            return None;
        }

        BASE.store(address as usize, Ordering::Relaxed);
        Some(address as usize)
    }

    impl PlatformSpecificBreak for Platform {
        unsafe fn expand(bytes: usize) -> Pointer<u8> {
            let base = reservation_base()?;
            let page = page_size();

            let old_break = BREAK.load(Ordering::Relaxed);
            let new_break = old_break.checked_add(bytes)?;
            if new_break > RESERVATION {
                return None;
            }

            // Commit whatever page range the move uncovers.
            let committed = round_to_pages(old_break, page);
            let needed = round_to_pages(new_break, page);
            if needed > committed {
                let address = Memory::VirtualAlloc(
                    Some((base + committed) as *const _),
                    needed - committed,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );
                if address.is_null() {
                    return None;
                }
            }

            BREAK.store(new_break, Ordering::Relaxed);
            Some(NonNull::new_unchecked((base + old_break) as *mut u8))
        }

        unsafe fn contract(bytes: usize) -> bool {
            let base = BASE.load(Ordering::Relaxed);
            let old_break = BREAK.load(Ordering::Relaxed);
            if base == 0 || bytes > old_break {
                return false;
            }

            let page = page_size();
            let new_break = old_break - bytes;

            let keep = round_to_pages(new_break, page);
            let committed = round_to_pages(old_break, page);
            if committed > keep
                && !Memory::VirtualFree(
                    (base + keep) as *mut _,
                    committed - keep,
                    Memory::MEM_DECOMMIT,
                )
                .as_bool()
            {
                return false;
            }

            BREAK.store(new_break, Ordering::Relaxed);
            true
        }
    }
}
