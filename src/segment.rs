use crate::{chunk::CHUNK_HEADER_SIZE, Pointer};

/// Coarse allocation block of the default configuration. The segment only
/// ever grows in multiples of this, and only shrinks once an entirely free
/// tail of at least this size has piled up. Must be a power of two, far
/// larger than a typical allocation, so the break syscall stays rare.
pub const COARSE_BLOCK: usize = 8 * 1024 * 1024;

/// How many bytes to grow the segment by so that a chunk with `payload`
/// bytes fits: the payload plus its header, padded up to whole coarse
/// blocks with at least one spare block for subsequent requests. `None` on
/// arithmetic overflow, which the caller surfaces as out-of-memory.
pub(crate) fn growth_size(payload: usize, coarse: usize) -> Option<usize> {
    let total = payload.checked_add(CHUNK_HEADER_SIZE + coarse)?;
    Some(total / coarse * coarse)
}

/// Owner of the contract with the OS break primitive. On real targets the
/// break itself is the only state, so this is a zero sized handle over
/// [`crate::platform`].
#[cfg(not(any(test, miri)))]
pub(crate) struct Segment;

#[cfg(not(any(test, miri)))]
impl Segment {
    pub const fn new() -> Self {
        Segment
    }

    /// Grows the segment by `bytes` and returns the address of the new
    /// region (the old break).
    pub unsafe fn expand(&mut self, bytes: usize) -> Pointer<u8> {
        crate::platform::expand(bytes)
    }

    /// Gives the top `bytes` of the segment back to the OS.
    pub unsafe fn contract(&mut self, bytes: usize) -> bool {
        crate::platform::contract(bytes)
    }
}

/// When testing (or running under Miri, which cannot do FFI) the break is
/// simulated inside one lazily allocated slab, so every allocator instance
/// owns a private, deterministic segment and the suite can run in parallel
/// without fighting over the real process break.
#[cfg(any(test, miri))]
pub(crate) struct Segment {
    slab: Pointer<u8>,
    brk: usize,
    deny_contract: bool,
}

#[cfg(any(test, miri))]
impl Segment {
    /// Plenty for every scenario in the test suite; untouched pages are
    /// never committed by the OS anyway.
    const SLAB_CAPACITY: usize = 64 * 1024 * 1024;

    pub const fn new() -> Self {
        Self {
            slab: None,
            brk: 0,
            deny_contract: false,
        }
    }

    fn slab_layout() -> std::alloc::Layout {
        std::alloc::Layout::from_size_align(Self::SLAB_CAPACITY, 4096).unwrap()
    }

    pub unsafe fn expand(&mut self, bytes: usize) -> Pointer<u8> {
        let slab = match self.slab {
            Some(slab) => slab,
            None => {
                let slab = std::ptr::NonNull::new(std::alloc::alloc(Self::slab_layout()))?;
                self.slab = Some(slab);
                slab
            }
        };

        if bytes > Self::SLAB_CAPACITY - self.brk {
            return None;
        }

        let old_break = std::ptr::NonNull::new_unchecked(slab.as_ptr().add(self.brk));
        self.brk += bytes;

        Some(old_break)
    }

    pub unsafe fn contract(&mut self, bytes: usize) -> bool {
        if self.deny_contract {
            return false;
        }

        debug_assert!(bytes <= self.brk);
        self.brk -= bytes;
        true
    }

    /// Current break as an offset into the slab. Zero before any growth and
    /// again after every grown byte has been trimmed away.
    pub fn position(&self) -> usize {
        self.brk
    }

    /// Makes every subsequent [`Segment::contract`] fail, to exercise the
    /// shrink-failure path of the tail trim.
    #[cfg(test)]
    pub fn deny_contract(&mut self) {
        self.deny_contract = true;
    }
}

#[cfg(any(test, miri))]
impl Drop for Segment {
    fn drop(&mut self) {
        if let Some(slab) = self.slab {
            unsafe { std::alloc::dealloc(slab.as_ptr(), Self::slab_layout()) };
        }
    }
}
