#![feature(allocator_api)]

//! A heap allocator built on the program break, the classic way: one
//! address-ordered doubly linked heap of chunks, an exact-size free index
//! over it, eager coalescing on release, and a tail trim that hands whole
//! coarse blocks back to the OS. A single mutex serialises everything.
//!
//! ```text
//!                                   Free index (bucket per exact size)
//!                                        |              |
//!                                        v              v
//! +--------+---------+  +--------+------+  +--------+------------------+
//! | header | payload |->| header | free |->| header |       free       |
//! +--------+---------+<-+--------+------+<-+--------+------------------+
//! ^                                                                    ^
//! |                                                                    |
//! +-- heap head (segment base)                        program break  --+
//! ```
//!
//! The segment only moves in coarse steps (8 MiB by default): it grows when
//! no free chunk fits a request and shrinks when an entirely free tail of at
//! least one coarse block has piled up. Everything in between is recycling:
//! released chunks go into a size-indexed cache for O(1) exact-size reuse,
//! and a tail-to-head first-fit scan covers the rest, splitting oversized
//! chunks and lazily re-indexing whatever it walks past.
//!
//! [`Brkalloc`] exposes this three ways: the raw malloc contract
//! ([`Brkalloc::malloc`] and friends), [`std::alloc::GlobalAlloc`] for
//! `#[global_allocator]`, and [`std::alloc::Allocator`] for per-container
//! use. The `interpose` cargo feature additionally exports unmangled C
//! symbols so a `cdylib` build can be preloaded over libc.
//!
//! Since the program break is process-global, exactly one instance should
//! exist per process.

use std::{alloc::AllocError, ptr::NonNull};

mod align;
mod allocator;
mod chunk;
mod heap;
mod index;
#[cfg(feature = "interpose")]
mod interpose;
mod list;
#[cfg(not(any(test, miri)))]
mod platform;
mod segment;

/// Non-null pointer to `T`. Used in most places instead of `*mut T` so the
/// compiler makes us handle the `None` case explicitly.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Shorter syntax for allocation return types.
pub(crate) type AllocResult = Result<NonNull<[u8]>, AllocError>;

pub use align::{align_up, ALIGNMENT};
pub use allocator::Brkalloc;
pub use index::INDEX_CAPACITY;
pub use segment::COARSE_BLOCK;
