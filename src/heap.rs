use std::{alloc::AllocError, fmt, ptr, ptr::NonNull};

use crate::{
    align::{align_up, ALIGNMENT},
    chunk::{ChunkHeader, CHUNK_HEADER_SIZE, MIN_CHUNK_SIZE},
    index::FreeIndex,
    list::ChunkList,
    segment::{growth_size, Segment},
    AllocResult, Pointer,
};

/// The allocator core: one address-ordered heap of chunks, one exact-size
/// free index over it, and the segment they both live in. Everything here
/// assumes it runs under the caller's lock; see [`crate::allocator`] for the
/// thread safe shell.
///
/// ```text
///                 Free index (exact payload sizes)
///
///    buckets[1] --------------+         +-- buckets[8186]
///                             |         |
///                             v         v
///  +--------+------+  +--------+  +-----------------+
///  | header | used |  | header |  | header |  free  |   ...segment break
///  +--------+------+  +--------+  +-----------------+
///  ^                  ^ free    ^
///  |                  |         |
///  head               |         +-- chunks are adjacent: header + payload
///                     |             of one ends where the next begins
///                     +-- 16 byte free chunk
/// ```
///
/// The two structures deliberately overlap: the heap list owns the canonical
/// layout of memory while the index is only a cache of free chunks by exact
/// size. A free chunk may legally be missing from the index (its size can
/// exceed the bucket range, or a failed tail trim left it out); the
/// allocation scan re-indexes such chunks as it walks past them.
///
/// `COARSE` is the segment growth unit and `BUCKETS` the index capacity;
/// they must satisfy `BUCKETS == COARSE / ALIGNMENT`.
pub(crate) struct Heap<const COARSE: usize, const BUCKETS: usize> {
    /// Every chunk carved out of the segment, free or in use.
    chunks: ChunkList,
    /// Exact-size cache of free chunks.
    index: FreeIndex<BUCKETS>,
    /// The contract with the OS break primitive.
    segment: Segment,
}

impl<const COARSE: usize, const BUCKETS: usize> Heap<COARSE, BUCKETS> {
    pub const fn new() -> Self {
        assert!(COARSE.is_power_of_two());
        assert!(BUCKETS == COARSE / ALIGNMENT);

        Self {
            chunks: ChunkList::new(),
            index: FreeIndex::new(),
            segment: Segment::new(),
        }
    }

    /// Allocates a chunk whose payload can hold at least `size` bytes and
    /// returns the whole payload, which may be larger than requested. A zero
    /// `size` yields one alignment unit.
    pub unsafe fn allocate(&mut self, size: usize) -> AllocResult {
        // No layout can exceed isize::MAX bytes; rejecting here also keeps
        // the rounding below from wrapping.
        if size > isize::MAX as usize {
            return Err(AllocError);
        }

        let size = if size == 0 { MIN_CHUNK_SIZE } else { align_up(size) };

        loop {
            if let Some(mut chunk) = self.find_fit(size) {
                chunk.as_mut().is_free = false;
                let payload = ChunkHeader::payload_address_of(chunk);
                return Ok(NonNull::slice_from_raw_parts(payload, chunk.as_ref().size));
            }

            // Nothing in the heap can hold `size` bytes. Grow the segment
            // and try again; the second pass is guaranteed to fit.
            self.expand_segment(size)?;
        }
    }

    /// Allocates room for `count` elements of `size` bytes each and zeroes
    /// it. The zeroing covers the full chunk payload, since the caller may
    /// legally use every byte of it.
    pub unsafe fn allocate_zeroed(&mut self, count: usize, size: usize) -> AllocResult {
        if size != 0 && count > usize::MAX / size {
            return Err(AllocError);
        }

        let address = self.allocate(count * size)?;
        let payload = address.cast::<u8>();
        let chunk = ChunkHeader::from_payload_address(payload);
        ptr::write_bytes(payload.as_ptr(), 0, chunk.as_ref().size);

        Ok(address)
    }

    /// Moves the allocation at `address` to a chunk of the new size. The old
    /// pointer stays valid if and only if the result is an error, except
    /// that a chunk whose payload already measures the rounded `new_size` is
    /// returned as is. A zero `new_size` releases the allocation and hands
    /// back a fresh minimum-size chunk. No in-place growth into a free right
    /// neighbour is attempted.
    pub unsafe fn reallocate(&mut self, address: NonNull<u8>, new_size: usize) -> AllocResult {
        if new_size == 0 {
            self.release(address);
            return self.allocate(MIN_CHUNK_SIZE);
        }

        if new_size > isize::MAX as usize {
            return Err(AllocError);
        }

        let chunk = ChunkHeader::from_payload_address(address);

        if align_up(new_size) == chunk.as_ref().size {
            return Ok(NonNull::slice_from_raw_parts(address, chunk.as_ref().size));
        }

        let new_address = self.allocate(new_size)?;
        let new_chunk = ChunkHeader::from_payload_address(new_address.cast());

        let preserved = chunk.as_ref().size.min(new_chunk.as_ref().size);
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.cast().as_ptr(), preserved);

        self.release(address);

        Ok(new_address)
    }

    /// Releases the chunk owning the payload at `address`. Releasing an
    /// already free chunk is a no-op; adjacent free neighbours are merged
    /// eagerly and a sufficiently large free tail is given back to the OS.
    pub unsafe fn release(&mut self, address: NonNull<u8>) {
        let mut chunk = ChunkHeader::from_payload_address(address);

        if chunk.as_ref().is_free {
            return;
        }

        debug_assert!(chunk.as_ref().size >= MIN_CHUNK_SIZE);
        chunk.as_mut().is_free = true;

        if chunk.as_ref().prev.is_some_and(|prev| prev.as_ref().is_free) {
            // The left neighbour absorbs this chunk (and any free run after
            // it), so it is the one that goes back into the index.
            let prev = chunk.as_ref().prev.unwrap();
            self.coalesce_forward(prev);
            self.index.insert(prev);
        } else if chunk.as_ref().next.is_some_and(|next| next.as_ref().is_free) {
            self.coalesce_forward(chunk);
            self.index.insert(chunk);
        } else {
            self.index.insert(chunk);
        }

        self.trim_tail();
    }

    /// Finds a free chunk with a payload of at least `size` bytes, detached
    /// from the index and already split down to size. `None` means the
    /// segment must grow.
    unsafe fn find_fit(&mut self, size: usize) -> Pointer<ChunkHeader> {
        // Fast path: a chunk of this exact size was released earlier.
        if let Some(chunk) = self.index.take(size) {
            return Some(chunk);
        }

        // Slow path: first fit scanning tail to head. Recently carved chunks
        // sit near the tail, so transient allocations cluster there and the
        // head side settles into long-lived ones, which is what makes the
        // tail trim succeed at all.
        let mut cursor = self.chunks.tail;
        while let Some(chunk) = cursor {
            if chunk.as_ref().is_free && chunk.as_ref().size >= size {
                self.index.remove(chunk);
                self.split_chunk(chunk, size);
                return Some(chunk);
            }

            if chunk.as_ref().is_free {
                // Free but too small. Make sure the index knows about it;
                // chunks dropped out of the index by a failed tail trim are
                // rediscovered here.
                self.index.insert(chunk);
            }

            cursor = chunk.as_ref().prev;
        }

        None
    }

    /// Carves the tail of `chunk`'s payload into a separate free chunk,
    /// leaving `chunk` with exactly `size` payload bytes. Does nothing
    /// unless a remainder header plus at least one byte fits, in which case
    /// the waste is bounded by the header size plus one alignment unit.
    ///
    /// `chunk` must not be indexed, since its size is about to change.
    unsafe fn split_chunk(&mut self, mut chunk: NonNull<ChunkHeader>, size: usize) {
        debug_assert!(!chunk.as_ref().is_indexed);
        debug_assert_eq!(size % ALIGNMENT, 0);

        if chunk.as_ref().size <= CHUNK_HEADER_SIZE + size {
            return;
        }

        let remainder_size = chunk.as_ref().size - size - CHUNK_HEADER_SIZE;
        let address = ChunkHeader::payload_address_of(chunk).as_ptr().add(size);

        let remainder =
            self.chunks
                .insert_after(chunk, NonNull::new_unchecked(address), remainder_size);
        self.index.insert(remainder);

        chunk.as_mut().size = size;
    }

    /// Merges the contiguous run of free chunks starting at `start` into
    /// `start` itself: every absorbed chunk leaves the index and the heap
    /// list, and its full footprint (header included) becomes payload of
    /// `start`. The walk stops at the first chunk in use or at the end of
    /// the heap. `start` is pulled out of the index too, as its size is
    /// about to change; the caller re-inserts it afterwards.
    unsafe fn coalesce_forward(&mut self, mut start: NonNull<ChunkHeader>) {
        debug_assert!(start.as_ref().is_free);
        self.index.remove(start);

        let mut absorbed = 0;
        let mut cursor = start.as_ref().next;

        while let Some(chunk) = cursor.filter(|chunk| chunk.as_ref().is_free) {
            self.index.remove(chunk);
            absorbed += chunk.as_ref().total_size();
            cursor = chunk.as_ref().next;
            self.chunks.remove(chunk);
        }

        start.as_mut().size += absorbed;
    }

    /// Grows the segment far enough for a payload of `size` bytes. If the
    /// current tail chunk is free the grown bytes simply extend its payload
    /// (the region starts exactly where that payload ends); otherwise the
    /// region becomes a new free tail chunk.
    unsafe fn expand_segment(&mut self, size: usize) -> Result<(), AllocError> {
        let bytes = growth_size(size, COARSE).ok_or(AllocError)?;
        let old_break = self.segment.expand(bytes).ok_or(AllocError)?;

        debug_assert_eq!(old_break.as_ptr() as usize % ALIGNMENT, 0);
        debug_assert!(self
            .chunks
            .end_address()
            .is_none_or(|end| end == old_break.as_ptr() as usize));

        if let Some(mut tail) = self.chunks.tail {
            if tail.as_ref().is_free {
                // The extended tail leaves the index (its size changes) and
                // the allocation scan picks it up on the next pass.
                self.index.remove(tail);
                tail.as_mut().size += bytes;
                return Ok(());
            }
        }

        let chunk = self.chunks.push_back(old_break, bytes - CHUNK_HEADER_SIZE);
        self.index.insert(chunk);

        Ok(())
    }

    /// Gives a fully free tail of the heap back to the OS once it reaches
    /// the coarse block. Triggered by the free byte counter, or directly by
    /// a free tail chunk with a coarse-block payload: coalescing can produce
    /// tail chunks too large for any index bucket, and those never show up
    /// in the counter.
    unsafe fn trim_tail(&mut self) {
        let huge_free_tail = self
            .chunks
            .tail
            .is_some_and(|tail| tail.as_ref().is_free && tail.as_ref().size >= COARSE);

        if self.index.free_bytes() < COARSE && !huge_free_tail {
            return;
        }

        // Collect the free tail run, pulling every chunk out of the index.
        let mut collected = 0;
        let mut count = 0;
        let mut cursor = self.chunks.tail;

        while let Some(chunk) = cursor.filter(|chunk| chunk.as_ref().is_free) {
            self.index.remove(chunk);
            collected += chunk.as_ref().total_size();
            count += 1;
            cursor = chunk.as_ref().prev;
        }

        if collected < COARSE || !self.segment.contract(collected) {
            // Too small to be worth a syscall, or the OS refused. Either
            // way the collected chunks go back into the index; oversized
            // ones are picked up again by the allocation scan.
            self.reinsert_tail_run(count);
            return;
        }

        self.chunks.truncate_back(cursor, count);
    }

    /// Puts the last `count` chunks of the heap back into the free index
    /// after an aborted tail trim.
    unsafe fn reinsert_tail_run(&mut self, count: usize) {
        let mut cursor = self.chunks.tail;
        for _ in 0..count {
            let chunk = cursor.unwrap();
            self.index.insert(chunk);
            cursor = chunk.as_ref().prev;
        }
    }
}

/// Chunk-by-chunk dump of the heap, in address order.
impl<const COARSE: usize, const BUCKETS: usize> fmt::Debug for Heap<COARSE, BUCKETS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chunks = f.debug_list();
        let mut cursor = self.chunks.head;

        while let Some(chunk) = cursor {
            let header = unsafe { chunk.as_ref() };
            chunks.entry(&format_args!(
                "{:?}: {} bytes, {}{}",
                chunk.as_ptr(),
                header.size,
                if header.is_free { "free" } else { "used" },
                if header.is_indexed { ", indexed" } else { "" },
            ));
            cursor = header.next;
        }

        chunks.finish()
    }
}

#[cfg(test)]
impl<const COARSE: usize, const BUCKETS: usize> Heap<COARSE, BUCKETS> {
    pub fn segment_position(&self) -> usize {
        self.segment.position()
    }

    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len
    }

    pub fn used_chunks(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.chunks.head;
        while let Some(chunk) = cursor {
            let header = unsafe { chunk.as_ref() };
            count += usize::from(!header.is_free);
            cursor = header.next;
        }
        count
    }

    /// Verifies every structural property the allocator promises to restore
    /// between public calls. Panics on the first violation.
    pub unsafe fn check_consistency(&self) {
        let mut count = 0;
        let mut indexed_bytes = 0;
        let mut footprint = 0;
        let mut previous: Pointer<ChunkHeader> = None;
        let mut cursor = self.chunks.head;

        while let Some(chunk) = cursor {
            let header = chunk.as_ref();
            count += 1;
            footprint += header.total_size();

            // Two-way linkage.
            assert_eq!(header.prev, previous, "prev link out of sync");

            // Address order and contiguity with the right neighbour.
            if let Some(next) = header.next {
                assert_eq!(
                    chunk.as_ptr() as usize + header.total_size(),
                    next.as_ptr() as usize,
                    "chunks are not adjacent"
                );

                // Eager coalescing leaves no free pairs behind.
                assert!(
                    !(header.is_free && next.as_ref().is_free),
                    "adjacent free chunks"
                );
            }

            // Payloads are aligned and never empty.
            let payload = ChunkHeader::payload_address_of(chunk);
            assert_eq!(payload.as_ptr() as usize % ALIGNMENT, 0);
            assert!(header.size >= MIN_CHUNK_SIZE);
            assert_eq!(header.size % ALIGNMENT, 0);

            // Flag and bucket agreement.
            if header.is_indexed {
                assert!(header.is_free, "indexed chunk in use");
                assert!(self.index.contains(chunk), "indexed chunk not in bucket");
                indexed_bytes += header.size;
            } else {
                assert!(!self.index.contains(chunk), "stray chunk in bucket");
            }

            previous = cursor;
            cursor = header.next;
        }

        assert_eq!(previous, self.chunks.tail, "tail pivot out of sync");
        assert_eq!(count, self.chunks.len, "length counter out of sync");
        assert_eq!(
            indexed_bytes,
            self.index.free_bytes(),
            "free byte counter out of sync"
        );
        assert_eq!(
            footprint,
            self.segment.position(),
            "segment break out of sync with the heap"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COARSE: usize = 1 << 16;

    type TestHeap = Heap<TEST_COARSE, { TEST_COARSE / ALIGNMENT }>;

    fn payload(result: AllocResult) -> NonNull<u8> {
        result.unwrap().cast::<u8>()
    }

    unsafe fn payload_size(address: NonNull<u8>) -> usize {
        ChunkHeader::from_payload_address(address).as_ref().size
    }

    #[test]
    fn exact_size_release_then_allocate_reuses_chunk() {
        let mut heap = TestHeap::new();

        unsafe {
            let p = payload(heap.allocate(16));
            heap.release(p);

            let q = payload(heap.allocate(16));
            assert_eq!(p, q);

            heap.check_consistency();
        }
    }

    #[test]
    fn released_neighbours_coalesce_and_serve_larger_request() {
        let mut heap = TestHeap::new();

        unsafe {
            let a = payload(heap.allocate(32));
            let b = payload(heap.allocate(32));

            // b sits right after a's payload and header.
            assert_eq!(
                b.as_ptr() as usize,
                a.as_ptr() as usize + 32 + CHUNK_HEADER_SIZE
            );

            heap.release(a);
            heap.release(b);
            heap.check_consistency();

            // The merged region serves a request neither chunk could have
            // held alone, with no further segment growth.
            let c = payload(heap.allocate(64));
            assert_eq!(c, a);
            assert_eq!(heap.segment_position(), TEST_COARSE);

            heap.check_consistency();
        }
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut heap = TestHeap::new();

        unsafe {
            let a = payload(heap.allocate(64));
            heap.release(a);

            let position = heap.segment_position();
            let chunks = heap.chunk_count();

            heap.release(a);
            assert_eq!(heap.segment_position(), position);
            assert_eq!(heap.chunk_count(), chunks);
            heap.check_consistency();

            let b = payload(heap.allocate(64));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn releasing_everything_trims_the_segment() {
        let mut heap = TestHeap::new();

        unsafe {
            let mut pointers = Vec::new();
            for _ in 0..300 {
                pointers.push(payload(heap.allocate(512)));
            }

            let peak = heap.segment_position();
            assert!(peak >= 300 * (512 + CHUNK_HEADER_SIZE));
            heap.check_consistency();

            for pointer in &pointers {
                heap.release(*pointer);
            }

            // The whole heap coalesced into one free tail and went back to
            // the OS.
            assert_eq!(heap.segment_position(), 0);
            assert_eq!(heap.chunk_count(), 0);
            heap.check_consistency();
        }
    }

    #[test]
    fn write_read_round_trip() {
        let mut heap = TestHeap::new();

        unsafe {
            let sizes = [16usize, 256, 1024, 4096];
            let mut pointers = Vec::new();

            for (i, size) in sizes.iter().enumerate() {
                let address = payload(heap.allocate(*size));
                for offset in 0..*size {
                    *address.as_ptr().add(offset) = (i + offset) as u8;
                }
                pointers.push(address);
            }

            // Nothing stepped on anything else.
            for (i, size) in sizes.iter().enumerate() {
                for offset in 0..*size {
                    assert_eq!(*pointers[i].as_ptr().add(offset), (i + offset) as u8);
                }
            }

            for pointer in pointers {
                heap.release(pointer);
            }
            heap.check_consistency();
        }
    }

    #[test]
    fn allocations_are_aligned() {
        let mut heap = TestHeap::new();

        unsafe {
            for size in [0usize, 1, 3, 8, 13, 100, 1000, 4097] {
                let address = payload(heap.allocate(size));
                assert_eq!(address.as_ptr() as usize % ALIGNMENT, 0);
                assert_eq!(payload_size(address) % ALIGNMENT, 0);
            }
        }
    }

    #[test]
    fn zero_byte_request_yields_one_alignment_unit() {
        let mut heap = TestHeap::new();

        unsafe {
            let address = payload(heap.allocate(0));
            assert_eq!(payload_size(address), MIN_CHUNK_SIZE);

            heap.release(address);
            heap.check_consistency();
        }
    }

    #[test]
    fn zeroed_allocation_clears_recycled_bytes() {
        let mut heap = TestHeap::new();

        unsafe {
            let dirty = payload(heap.allocate(64));
            ptr::write_bytes(dirty.as_ptr(), 0xAA, 64);
            heap.release(dirty);

            let address = payload(heap.allocate_zeroed(8, 8));
            // The entire payload is zeroed, not just the requested bytes.
            for offset in 0..payload_size(address) {
                assert_eq!(*address.as_ptr().add(offset), 0);
            }

            heap.check_consistency();
        }
    }

    #[test]
    fn zeroed_allocation_overflow_is_rejected_before_any_growth() {
        let mut heap = TestHeap::new();

        unsafe {
            assert!(heap.allocate_zeroed(usize::MAX, 2).is_err());
            assert!(heap.allocate_zeroed(usize::MAX / 2 + 2, 2).is_err());
            assert_eq!(heap.segment_position(), 0);

            // Zero elements are fine and yield a minimum size chunk.
            let address = payload(heap.allocate_zeroed(0, 8));
            assert_eq!(payload_size(address), MIN_CHUNK_SIZE);
        }
    }

    #[test]
    fn reallocation_preserves_leading_bytes() {
        let mut heap = TestHeap::new();

        unsafe {
            let p = payload(heap.allocate(100));
            ptr::write_bytes(p.as_ptr(), b'x', 100);

            let q = payload(heap.reallocate(p, 200));
            assert_ne!(p, q);
            for offset in 0..100 {
                assert_eq!(*q.as_ptr().add(offset), b'x');
            }

            heap.release(q);
            heap.check_consistency();
        }
    }

    #[test]
    fn reallocation_to_same_rounded_size_keeps_the_pointer() {
        let mut heap = TestHeap::new();

        unsafe {
            let p = payload(heap.allocate(100));
            let rounded = payload_size(p);

            assert_eq!(payload(heap.reallocate(p, rounded)), p);
            assert_eq!(payload(heap.reallocate(p, 97)), p);

            heap.check_consistency();
        }
    }

    #[test]
    fn reallocation_to_zero_releases_and_hands_out_minimum_chunk() {
        let mut heap = TestHeap::new();

        unsafe {
            let p = payload(heap.allocate(100));
            let q = payload(heap.reallocate(p, 0));

            assert_eq!(payload_size(q), MIN_CHUNK_SIZE);
            heap.release(q);
            heap.check_consistency();
        }
    }

    #[test]
    fn failed_reallocation_leaves_the_allocation_untouched() {
        let mut heap = TestHeap::new();

        unsafe {
            let p = payload(heap.allocate(64));
            ptr::write_bytes(p.as_ptr(), 42, 64);

            // Larger than the mock segment can ever provide.
            assert!(heap.reallocate(p, 256 * 1024 * 1024).is_err());

            for offset in 0..64 {
                assert_eq!(*p.as_ptr().add(offset), 42);
            }
            assert!(!ChunkHeader::from_payload_address(p).as_ref().is_free);

            heap.release(p);
            heap.check_consistency();
        }
    }

    #[test]
    fn out_of_memory_surfaces_as_error() {
        let mut heap = TestHeap::new();

        unsafe {
            assert!(heap.allocate(256 * 1024 * 1024).is_err());
            assert!(heap.allocate(usize::MAX - 16).is_err());
            heap.check_consistency();

            // The heap keeps working afterwards.
            let p = payload(heap.allocate(16));
            heap.release(p);
            heap.check_consistency();
        }
    }

    #[test]
    fn growth_extends_a_free_tail_chunk() {
        let mut heap = TestHeap::new();

        unsafe {
            let a = payload(heap.allocate(16));
            assert_eq!(heap.segment_position(), TEST_COARSE);

            // Far larger than the free tail: the segment grows and the tail
            // chunk absorbs the new region instead of a new chunk appearing.
            let chunks_before = heap.chunk_count();
            let b = payload(heap.allocate(2 * TEST_COARSE));

            assert_eq!(
                b.as_ptr() as usize,
                a.as_ptr() as usize + 16 + CHUNK_HEADER_SIZE
            );
            assert!(heap.segment_position() > TEST_COARSE);

            // The extended tail was split into `b` plus a new remainder, so
            // exactly one chunk was added overall.
            assert_eq!(heap.chunk_count(), chunks_before + 1);

            heap.check_consistency();
        }
    }

    #[test]
    fn failed_shrink_keeps_the_heap_usable() {
        let mut heap = TestHeap::new();

        unsafe {
            heap.segment_mut().deny_contract();

            let p = payload(heap.allocate(TEST_COARSE));
            let position = heap.segment_position();

            // Releasing merges the whole segment into one free tail large
            // enough to trim, but the shrink "syscall" refuses.
            heap.release(p);
            assert_eq!(heap.segment_position(), position);
            heap.check_consistency();

            // The chunk is too large for any bucket, so only the heap scan
            // can find it again.
            let q = payload(heap.allocate(1024));
            assert_eq!(p, q);
            heap.check_consistency();
        }
    }

    #[test]
    fn undersized_tail_run_is_reindexed_after_aborted_trim() {
        let mut heap = TestHeap::new();

        unsafe {
            // Three allocations plus the remainder of the grown segment.
            let a = payload(heap.allocate(30000));
            let b = payload(heap.allocate(30000));
            let c = payload(heap.allocate(30000));

            // Releasing `a` pushes the free byte counter past the coarse
            // block, but the free tail run (just the remainder chunk) is far
            // smaller, so the trim walk backs off and re-indexes it.
            heap.release(a);
            let position = heap.segment_position();
            heap.check_consistency();

            // Releasing `c` merges it with the remainder into a free tail
            // that finally is worth trimming.
            heap.release(c);
            assert!(heap.segment_position() < position);
            heap.check_consistency();

            heap.release(b);
            heap.check_consistency();
        }
    }

    #[test]
    fn mixed_workload_stays_consistent() {
        let mut heap = TestHeap::new();

        unsafe {
            let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
            let mut state: u64 = 0x2545F4914F6CDD1D;

            for round in 0..2000 {
                // Cheap deterministic generator, xorshift style.
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;

                if live.len() > 64 || (!live.is_empty() && state % 3 == 0) {
                    let (address, size) = live.swap_remove(state as usize % live.len());
                    for offset in (0..size).step_by(64) {
                        assert_eq!(*address.as_ptr().add(offset), (size % 251) as u8);
                    }
                    heap.release(address);
                } else {
                    let size = 1 + state as usize % 2048;
                    let address = payload(heap.allocate(size));
                    for offset in (0..size).step_by(64) {
                        *address.as_ptr().add(offset) = (size % 251) as u8;
                    }
                    live.push((address, size));
                }

                if round % 64 == 0 {
                    heap.check_consistency();
                }
            }

            for (address, _) in live {
                heap.release(address);
            }
            heap.check_consistency();
        }
    }
}
