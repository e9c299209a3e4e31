//! Tagged non-paged allocation with parent-scoped release.
//!
//! Every allocation is zeroed, tagged with a 4-character diagnostic tag,
//! and owned by a [`PoolObject`] parent: the memory is released when the
//! parent is torn down, never by ad-hoc frees scattered through the
//! driver.
#![no_std]
#![deny(unsafe_op_in_unsafe_fn, clippy::multiple_unsafe_ops_per_block)]

extern crate alloc;

// During tests, allow importing std
#[cfg(any(test))]
extern crate std;

pub mod mdl;
pub mod object;
pub mod sync;
pub mod tag;

pub use mdl::{MdlDescriptor, PAGE_SIZE};
pub use object::{PoolFlags, PoolMemory, PoolObject, MEMORY_ALLOCATION_ALIGNMENT};
pub use tag::PoolTag;

/// Why an allocation request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The underlying allocator could not satisfy the request.
    OutOfMemory,
    /// A zero size, or an alignment that is not a power of two.
    InvalidSize,
}

impl core::fmt::Display for PoolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            PoolError::OutOfMemory => "non-paged pool exhausted",
            PoolError::InvalidSize => "invalid allocation size or alignment",
        };
        f.write_str(message)
    }
}
