use std::{
    alloc::{AllocError, Allocator, GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::Mutex,
};

use crate::{
    align::ALIGNMENT, heap::Heap, index::INDEX_CAPACITY, segment::COARSE_BLOCK, AllocResult,
};

/// The public allocator: a [`Heap`] behind one process-wide [`Mutex`]. Every
/// entry point takes the lock, runs the whole operation under it, and
/// releases it before returning; there are no suspension points inside the
/// core, so the lock is only ever held for short, bounded work (the break
/// syscalls included, which are cheap pointer moves in the kernel).
///
/// A failed lock acquisition (a poisoned mutex) is reported the same way as
/// out-of-memory: null from the raw entry points, [`AllocError`] from the
/// [`Allocator`] ones. Release does nothing in that case.
///
/// `COARSE` is the segment growth unit in bytes and `BUCKETS` the free index
/// capacity, `COARSE / ALIGNMENT`. The defaults fit general use; shrinking
/// both (keeping the ratio) makes sense mostly for tests.
///
/// # Examples
///
/// ## Raw pointers, malloc style
///
/// ```no_run
/// use brkalloc::Brkalloc;
///
/// static ALLOCATOR: Brkalloc = Brkalloc::new();
///
/// let address = ALLOCATOR.malloc(97);
/// assert!(!address.is_null());
/// // Payloads are aligned and rounded up to the alignment unit.
/// assert_eq!(address as usize % brkalloc::ALIGNMENT, 0);
///
/// unsafe { ALLOCATOR.free(address) };
/// ```
///
/// ## Global allocator
///
/// ```no_run
/// use brkalloc::Brkalloc;
///
/// #[global_allocator]
/// static ALLOCATOR: Brkalloc = Brkalloc::new();
///
/// fn main() {
///     let num = Box::new(5);
///     assert_eq!(*num, 5);
/// }
/// ```
///
/// ## Per-container allocator
///
/// ```no_run
/// #![feature(allocator_api)]
///
/// use brkalloc::Brkalloc;
///
/// let allocator: Brkalloc = Brkalloc::new();
///
/// let mut vec = Vec::new_in(&allocator);
/// vec.push(5);
/// assert_eq!(vec[0], 5);
/// ```
///
/// # One segment per process
///
/// The program break is process-global state. Two instances would both move
/// it and each would corrupt the other's idea of where its tail ends, so
/// create exactly one `Brkalloc` per process, preferably in a `static`.
pub struct Brkalloc<const COARSE: usize = COARSE_BLOCK, const BUCKETS: usize = INDEX_CAPACITY> {
    heap: Mutex<Heap<COARSE, BUCKETS>>,
}

/// The raw chunk pointers inside make [`Heap`] neither [`Send`] nor [`Sync`],
/// but every access goes through the mutex and chunks are never shared
/// outside it.
unsafe impl<const COARSE: usize, const BUCKETS: usize> Sync for Brkalloc<COARSE, BUCKETS> {}

impl<const COARSE: usize, const BUCKETS: usize> Brkalloc<COARSE, BUCKETS> {
    /// Builds the allocator. No memory is requested until the first
    /// allocation, so this is usable in statics.
    pub const fn new() -> Self {
        Self {
            heap: Mutex::new(Heap::new()),
        }
    }

    /// Allocates `size` bytes and returns the payload address, or null if
    /// the OS refuses to grow the segment. A zero `size` yields one
    /// alignment unit. The payload is always aligned to [`ALIGNMENT`]
    /// ([`crate::ALIGNMENT`]).
    pub fn malloc(&self, size: usize) -> *mut u8 {
        match self.heap.lock() {
            Ok(mut heap) => match unsafe { heap.allocate(size) } {
                Ok(address) => address.cast().as_ptr(),
                Err(_) => ptr::null_mut(),
            },
            Err(_) => ptr::null_mut(),
        }
    }

    /// Allocates room for `count` elements of `size` bytes each, zeroed.
    /// Null if the element product overflows (checked before any OS
    /// contact) or the segment cannot grow.
    pub fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        match self.heap.lock() {
            Ok(mut heap) => match unsafe { heap.allocate_zeroed(count, size) } {
                Ok(address) => address.cast().as_ptr(),
                Err(_) => ptr::null_mut(),
            },
            Err(_) => ptr::null_mut(),
        }
    }

    /// Resizes the allocation at `address` to `new_size` bytes, moving the
    /// contents if needed. Null `address` behaves as [`Brkalloc::malloc`];
    /// zero `new_size` releases the allocation and returns a fresh
    /// minimum-size one. On failure null comes back and the old allocation
    /// is left untouched.
    ///
    /// # Safety
    ///
    /// `address` must be null or a live payload address returned by this
    /// allocator.
    pub unsafe fn realloc(&self, address: *mut u8, new_size: usize) -> *mut u8 {
        let Ok(mut heap) = self.heap.lock() else {
            return ptr::null_mut();
        };

        let result = match NonNull::new(address) {
            Some(address) => heap.reallocate(address, new_size),
            None => heap.allocate(new_size),
        };

        match result {
            Ok(new_address) => new_address.cast().as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Releases the allocation at `address`. Null is a no-op, and so is
    /// releasing an address that is already free.
    ///
    /// # Safety
    ///
    /// `address` must be null or a payload address returned by this
    /// allocator that has not been handed out again since its last release.
    pub unsafe fn free(&self, address: *mut u8) {
        if let (Ok(mut heap), Some(address)) = (self.heap.lock(), NonNull::new(address)) {
            heap.release(address);
        }
    }
}

impl Default for Brkalloc {
    fn default() -> Self {
        Brkalloc::new()
    }
}

unsafe impl<const COARSE: usize, const BUCKETS: usize> Allocator for Brkalloc<COARSE, BUCKETS> {
    fn allocate(&self, layout: Layout) -> AllocResult {
        // Alignment stops at the word multiple by design; anything stronger
        // is reported as a failed allocation rather than served misaligned.
        if layout.align() > ALIGNMENT {
            return Err(AllocError);
        }

        match self.heap.lock() {
            Ok(mut heap) => unsafe { heap.allocate(layout.size()) },
            Err(_) => Err(AllocError),
        }
    }

    fn allocate_zeroed(&self, layout: Layout) -> AllocResult {
        if layout.align() > ALIGNMENT {
            return Err(AllocError);
        }

        match self.heap.lock() {
            Ok(mut heap) => unsafe { heap.allocate_zeroed(layout.size(), 1) },
            Err(_) => Err(AllocError),
        }
    }

    unsafe fn deallocate(&self, address: NonNull<u8>, _layout: Layout) {
        if let Ok(mut heap) = self.heap.lock() {
            heap.release(address);
        }
    }

    // `grow`, `grow_zeroed` and `shrink` keep their default implementations:
    // allocate, copy, deallocate is exactly this allocator's reallocation
    // policy, since in-place resizing is never attempted.
}

unsafe impl<const COARSE: usize, const BUCKETS: usize> GlobalAlloc for Brkalloc<COARSE, BUCKETS> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.malloc(layout.size())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.calloc(layout.size(), 1)
    }

    unsafe fn dealloc(&self, address: *mut u8, _layout: Layout) {
        self.free(address);
    }

    unsafe fn realloc(&self, address: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        Brkalloc::realloc(self, address, new_size)
    }
}
