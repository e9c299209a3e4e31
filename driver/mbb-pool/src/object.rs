//! Parent objects and the tagged allocations they own.

use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;

use crossbeam_utils::CachePadded;

use crate::sync::SpinMutex;
use crate::tag::PoolTag;
use crate::PoolError;

/// Alignment every pool allocation is guaranteed to meet, matching the
/// architecture-defined allocation granularity of the original pool.
pub const MEMORY_ALLOCATION_ALIGNMENT: usize = 16;

static_assertions::const_assert!(MEMORY_ALLOCATION_ALIGNMENT.is_power_of_two());

bitflags::bitflags! {
    /// Request flags for a pool allocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoolFlags: u32 {
        /// The region must stay resident (the only residency class this
        /// pool serves; carried on the request for allocator parity).
        const NON_PAGED = 1 << 0;
        /// Zero the region before returning it. The pool zeroes
        /// unconditionally; the flag exists for request parity.
        const ZERO_INIT = 1 << 1;
        /// Raise the alignment to [`MEMORY_ALLOCATION_ALIGNMENT`] if the
        /// request asked for less.
        const CACHE_ALIGNED = 1 << 2;
    }
}

/// One allocation owned by a [`PoolObject`].
struct Region {
    ptr: NonNull<u8>,
    layout: Layout,
    #[allow(dead_code)] // kept for memory-dump debugging
    tag: PoolTag,
}

#[derive(Default)]
struct TagStat {
    allocations: CachePadded<AtomicUsize>,
    bytes: CachePadded<AtomicUsize>,
}

/// An object that owns tagged pool allocations.
///
/// Mirrors the parent argument of the original memory-object constructor:
/// every allocation made through a parent is released when the parent is
/// torn down, and only then. Handles to the memory ([`PoolMemory`])
/// borrow the parent, so the parent provably outlives every view of the
/// memory it owns.
pub struct PoolObject {
    children: SpinMutex<Vec<Region>>,
    stats: [TagStat; PoolTag::ALL.len()],
}

impl PoolObject {
    /// Creates a parent owning no allocations.
    pub fn new() -> Self {
        Self {
            children: SpinMutex::new(Vec::new()),
            stats: core::array::from_fn(|_| TagStat::default()),
        }
    }

    /// Allocates a zeroed non-paged region at the default pool alignment.
    pub fn create_nonpaged(
        &self,
        size: usize,
        tag: PoolTag,
    ) -> Result<PoolMemory<'_>, PoolError> {
        self.create_aligned(size, MEMORY_ALLOCATION_ALIGNMENT, tag)
    }

    /// Allocates a zeroed non-paged region with an explicit alignment.
    pub fn create_aligned(
        &self,
        size: usize,
        align: usize,
        tag: PoolTag,
    ) -> Result<PoolMemory<'_>, PoolError> {
        self.create_with_flags(
            size,
            align,
            tag,
            PoolFlags::NON_PAGED | PoolFlags::ZERO_INIT,
        )
    }

    /// Allocates a region with explicit request flags.
    ///
    /// Fails with [`PoolError::InvalidSize`] for a zero `size` or an
    /// alignment that is not a power of two, and with
    /// [`PoolError::OutOfMemory`] when the underlying allocator cannot
    /// satisfy the request.
    pub fn create_with_flags(
        &self,
        size: usize,
        align: usize,
        tag: PoolTag,
        flags: PoolFlags,
    ) -> Result<PoolMemory<'_>, PoolError> {
        if size == 0 || align == 0 || !align.is_power_of_two() {
            return Err(PoolError::InvalidSize);
        }

        let align = if flags.contains(PoolFlags::CACHE_ALIGNED) {
            align.max(MEMORY_ALLOCATION_ALIGNMENT)
        } else {
            align
        };

        let layout = Layout::from_size_align(size, align).map_err(|_| PoolError::InvalidSize)?;

        // The pool never returns uninitialized memory, whatever the flags
        // say (`ZERO_INIT` is the only behavior on offer).
        //
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(PoolError::OutOfMemory)?;

        self.children.lock().push(Region { ptr, layout, tag });

        let stat = &self.stats[tag.index()];
        stat.allocations.fetch_add(1, Ordering::Relaxed);
        stat.bytes.fetch_add(size, Ordering::Relaxed);

        Ok(PoolMemory {
            ptr,
            len: size,
            tag,
            _owner: PhantomData,
        })
    }

    /// Number of live allocations made under `tag`.
    pub fn outstanding(&self, tag: PoolTag) -> usize {
        self.stats[tag.index()].allocations.load(Ordering::Relaxed)
    }

    /// Total bytes of live allocations made under `tag`.
    pub fn outstanding_bytes(&self, tag: PoolTag) -> usize {
        self.stats[tag.index()].bytes.load(Ordering::Relaxed)
    }
}

impl Default for PoolObject {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolObject {
    fn drop(&mut self) {
        // Having a `&mut self` proves no `PoolMemory` borrows remain, so
        // every owned region can be released.
        for region in self.children.get_mut().drain(..) {
            // SAFETY: `region.ptr` was returned by `alloc`/`alloc_zeroed`
            // with exactly `region.layout`, and is deallocated only here.
            unsafe { dealloc(region.ptr.as_ptr(), region.layout) };
        }
    }
}

/// A handle to one region owned by a [`PoolObject`].
///
/// The handle is the unique accessor of its region, but not its owner:
/// dropping the handle releases nothing, and the region stays allocated
/// until the parent is torn down. This is the owner-has-exactly-one-
/// releaser discipline of the original pool, expressed as a borrow.
#[derive(Debug)]
pub struct PoolMemory<'owner> {
    ptr: NonNull<u8>,
    len: usize,
    tag: PoolTag,
    _owner: PhantomData<&'owner PoolObject>,
}

impl PoolMemory<'_> {
    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The diagnostic tag the region was allocated under.
    pub fn tag(&self) -> PoolTag {
        self.tag
    }

    /// Base address of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: The region is `len` bytes, initialized (zeroed or
        // written through this handle), and lives until the parent is
        // dropped, which the `'owner` borrow outlives.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: As in `as_slice`; this handle is the unique accessor of
        // the region, and `&mut self` gives exclusive access to it.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

// SAFETY: A `PoolMemory` is the unique accessor of its region, so there
// are no foreign unsynchronized accesses to move across threads.
unsafe impl Send for PoolMemory<'_> {}
// SAFETY: A `PoolMemory` only mutates its region behind a `&mut`.
unsafe impl Sync for PoolMemory<'_> {}
