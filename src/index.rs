use std::ptr::NonNull;

use crate::{align::ALIGNMENT, chunk::ChunkHeader, segment::COARSE_BLOCK, Pointer};

/// Free index capacity of the default configuration: one bucket head per
/// possible payload size up to the coarse block.
pub const INDEX_CAPACITY: usize = COARSE_BLOCK / ALIGNMENT;

/// Exact-size cache of free chunks. Bucket `i` chains chunks whose payload
/// size is exactly `(i + 1) * ALIGNMENT`, so the common free-then-allocate-
/// the-same-size pattern is O(1). This is deliberately not a best-fit
/// structure: a miss here falls back to the heap scan, which also lazily
/// re-indexes any free chunk it walks past.
///
/// ```text
/// buckets[0]  ->  8 byte chunk -> 8 byte chunk -> ...
/// buckets[1]  ->  16 byte chunk
/// buckets[2]  ->  (empty)
///    ...
/// buckets[B-1] -> (B * ALIGNMENT) byte chunk
/// ```
///
/// Chunks whose bucket would fall past the end of the array are silently left
/// out; they stay reachable through the heap list only. `free_bytes` tracks
/// the payload bytes of indexed chunks exclusively.
pub(crate) struct FreeIndex<const BUCKETS: usize> {
    buckets: [Pointer<ChunkHeader>; BUCKETS],
    free_bytes: usize,
}

impl<const BUCKETS: usize> FreeIndex<BUCKETS> {
    pub const fn new() -> Self {
        Self {
            buckets: [None; BUCKETS],
            free_bytes: 0,
        }
    }

    /// Payload bytes currently sitting in the index.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Bucket for the given payload size, or `None` if the size is too large
    /// to be indexed. `size` must be aligned and non-zero; the allocation
    /// path normalises zero requests before any chunk exists, so a zero here
    /// is a bug.
    #[inline]
    fn bucket_of(size: usize) -> Option<usize> {
        debug_assert!(size >= ALIGNMENT && size % ALIGNMENT == 0);
        let bucket = size / ALIGNMENT - 1;
        (bucket < BUCKETS).then_some(bucket)
    }

    /// Prepends `chunk` to the bucket matching its payload size. No-op if the
    /// chunk is already indexed or its size is out of bucket range.
    ///
    /// # Safety
    ///
    /// `chunk` must point at a live, free chunk header.
    pub unsafe fn insert(&mut self, mut chunk: NonNull<ChunkHeader>) {
        if chunk.as_ref().is_indexed {
            return;
        }

        let Some(bucket) = Self::bucket_of(chunk.as_ref().size) else {
            return;
        };

        debug_assert!(chunk.as_ref().is_free);

        chunk.as_mut().next_free = self.buckets[bucket];
        chunk.as_mut().is_indexed = true;
        self.free_bytes += chunk.as_ref().size;
        self.buckets[bucket] = Some(chunk);
    }

    /// Unlinks `chunk` from its bucket. No-op if the chunk is not indexed,
    /// which lets the coalescer blindly remove every chunk in the run it
    /// walks.
    ///
    /// # Safety
    ///
    /// `chunk` must point at a live chunk header.
    pub unsafe fn remove(&mut self, mut chunk: NonNull<ChunkHeader>) {
        if !chunk.as_ref().is_indexed {
            return;
        }

        // An indexed chunk always has an in-range bucket.
        let bucket = Self::bucket_of(chunk.as_ref().size).unwrap();

        if self.buckets[bucket] == Some(chunk) {
            self.buckets[bucket] = chunk.as_ref().next_free;
        } else {
            // Chains are short in practice: they only hold exact-size
            // duplicates.
            let mut cursor = self.buckets[bucket];
            while let Some(mut current) = cursor {
                if current.as_ref().next_free == Some(chunk) {
                    current.as_mut().next_free = chunk.as_ref().next_free;
                    break;
                }
                cursor = current.as_ref().next_free;
            }
            debug_assert!(cursor.is_some(), "indexed chunk missing from bucket");
        }

        chunk.as_mut().is_indexed = false;
        self.free_bytes -= chunk.as_ref().size;
    }

    /// Detaches and returns the head of the bucket for exactly `size` bytes,
    /// if any. Larger buckets are never consulted; best fit is the heap
    /// scan's job.
    ///
    /// # Safety
    ///
    /// Indexed chunks must be live, which the allocator guarantees.
    pub unsafe fn take(&mut self, size: usize) -> Pointer<ChunkHeader> {
        let bucket = Self::bucket_of(size)?;
        let mut chunk = self.buckets[bucket]?;

        self.buckets[bucket] = chunk.as_ref().next_free;
        chunk.as_mut().is_indexed = false;
        self.free_bytes -= chunk.as_ref().size;

        Some(chunk)
    }

    /// Whether `chunk` can be found by walking its bucket. Test support.
    #[cfg(test)]
    pub unsafe fn contains(&self, chunk: NonNull<ChunkHeader>) -> bool {
        let Some(bucket) = Self::bucket_of(chunk.as_ref().size) else {
            return false;
        };

        let mut cursor = self.buckets[bucket];
        while let Some(current) = cursor {
            if current == chunk {
                return true;
            }
            cursor = current.as_ref().next_free;
        }

        false
    }
}
