//! C ABI wrappers over one static [`Brkalloc`], exported without mangling so
//! that a `cdylib` build of this crate can replace the libc allocator, either
//! at link time or preloaded:
//!
//! ```text
//! cargo build --release --features interpose
//! LD_PRELOAD=target/release/libbrkalloc.so ./some_program
//! ```
//!
//! These shims only forward to the allocator; every policy decision lives in
//! [`crate::heap`].

use std::ffi::c_void;

use crate::Brkalloc;

static ALLOCATOR: Brkalloc = Brkalloc::new();

#[no_mangle]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    ALLOCATOR.malloc(size).cast()
}

#[no_mangle]
pub extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    ALLOCATOR.calloc(count, size).cast()
}

/// # Safety
///
/// `address` must be null or a payload address previously returned by these
/// wrappers.
#[no_mangle]
pub unsafe extern "C" fn realloc(address: *mut c_void, size: usize) -> *mut c_void {
    ALLOCATOR.realloc(address.cast(), size).cast()
}

/// # Safety
///
/// `address` must be null or a payload address previously returned by these
/// wrappers, not already released.
#[no_mangle]
pub unsafe extern "C" fn free(address: *mut c_void) {
    ALLOCATOR.free(address.cast());
}
