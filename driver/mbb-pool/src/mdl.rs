//! Page-span bookkeeping for buffers handed to the hardware.

use crate::object::PoolMemory;
use crate::PoolError;

/// Size of one page, for span accounting.
pub const PAGE_SIZE: usize = 4096;

static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());

/// Page-level description of an existing buffer.
///
/// Carries the size bookkeeping of an MDL (offset within the first page,
/// byte count, spanned page count) without any mapping semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdlDescriptor {
    byte_offset: usize,
    byte_count: usize,
}

impl MdlDescriptor {
    /// Describes `length` bytes starting at `address`.
    ///
    /// Zero-length buffers are refused; an MDL always describes at least
    /// one byte of one page.
    pub fn describe(address: usize, length: usize) -> Result<Self, PoolError> {
        if length == 0 {
            return Err(PoolError::InvalidSize);
        }

        Ok(Self {
            byte_offset: address % PAGE_SIZE,
            byte_count: length,
        })
    }

    /// Describes a whole pool allocation.
    pub fn for_memory(memory: &PoolMemory<'_>) -> Result<Self, PoolError> {
        Self::describe(memory.as_ptr() as usize, memory.len())
    }

    /// Offset of the buffer within its first page.
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Length of the described buffer in bytes.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Number of pages the buffer touches.
    pub fn span_pages(&self) -> usize {
        (self.byte_offset + self.byte_count).div_ceil(PAGE_SIZE)
    }
}
