use std::{mem, ptr::NonNull};

use crate::{align::ALIGNMENT, Pointer};

/// Chunk header size in bytes. Multiple of [`ALIGNMENT`] (see the layout
/// notes on [`ChunkHeader`]), so a header written at an aligned address
/// yields an aligned payload.
pub(crate) const CHUNK_HEADER_SIZE: usize = mem::size_of::<ChunkHeader>();

/// Minimum payload size. Zero byte requests are bumped to this before
/// rounding, which also keeps the free index bucket computation
/// `size / ALIGNMENT - 1` from underflowing.
pub(crate) const MIN_CHUNK_SIZE: usize = ALIGNMENT;

/// Every byte the allocator controls belongs to exactly one chunk: a header
/// immediately followed by its payload. This is how a chunk looks in memory:
///
/// ```text
/// +----------------------------+          <----------------------+
/// | pointer to next chunk      |   <------+                      |
/// +----------------------------+          | Address ordered      |
/// | pointer to prev chunk      |   <------+ heap links           |
/// +----------------------------+                                 |
/// | pointer to next in bucket  |   <--- free index chain         | ChunkHeader
/// +----------------------------+                                 |
/// | payload size               |                                 |
/// +----------------------------+                                 |
/// | free / in-index flags      |                                 |
/// +----------------------------+          <----------------------+
/// |       Chunk payload        |   <------+
/// |            ...             |          | What the caller gets. Always a
/// |            ...             |          | multiple of ALIGNMENT bytes.
/// |            ...             |   <------+
/// +----------------------------+
/// ```
///
/// `next` and `prev` order every chunk by address: a chunk's header plus its
/// payload ends exactly where the next chunk's header begins. `next_free` is
/// only meaningful while `is_indexed` is set; it chains chunks of the same
/// payload size inside one free index bucket and holds garbage otherwise.
///
/// The compiler is free to reorder these fields; nothing here assumes a
/// specific order, only that the struct size is a multiple of [`ALIGNMENT`]
/// (checked by a test below, and guaranteed on any target where pointers and
/// `usize` have the same size).
pub(crate) struct ChunkHeader {
    /// Next chunk in the address ordered heap. `None` at the tail.
    pub next: Pointer<ChunkHeader>,
    /// Previous chunk in the address ordered heap. `None` at the head.
    pub prev: Pointer<ChunkHeader>,
    /// Next chunk in the same free index bucket. Garbage unless `is_indexed`.
    pub next_free: Pointer<ChunkHeader>,
    /// Payload size in bytes, excluding this header. Always aligned.
    pub size: usize,
    /// Whether the payload is currently handed out to a caller.
    pub is_free: bool,
    /// Whether this chunk is currently listed in the free index.
    pub is_indexed: bool,
}

impl ChunkHeader {
    /// A newly carved chunk: free, not yet indexed, not yet linked.
    pub fn free(size: usize) -> Self {
        Self {
            next: None,
            prev: None,
            next_free: None,
            size,
            is_free: true,
            is_indexed: false,
        }
    }

    /// Payload size plus header size, i.e. the chunk's full footprint in the
    /// segment.
    #[inline]
    pub fn total_size(&self) -> usize {
        CHUNK_HEADER_SIZE + self.size
    }

    /// Returns the header that owns the payload at `address`.
    ///
    /// ```text
    /// +-------------+
    /// | ChunkHeader | <- Returned pointer.
    /// +-------------+
    /// |   Payload   | <- Given address.
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// `address` must point exactly at the first payload byte of a chunk
    /// previously produced by this allocator. Release of any other pointer is
    /// undefined behaviour, as per the usual `free` contract.
    #[inline]
    pub unsafe fn from_payload_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// Returns the first payload byte of the given header.
    ///
    /// Written as `ChunkHeader::payload_address_of(chunk)` instead of a
    /// method to avoid creating intermediate `&self` references to memory the
    /// caller also writes through, which keeps Miri's aliasing checks happy.
    ///
    /// # Safety
    ///
    /// `chunk` must point at a live header. The returned address is good for
    /// up to `size` bytes.
    #[inline]
    pub unsafe fn payload_address_of(chunk: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(chunk.as_ptr().offset(1)).cast()
    }
}
