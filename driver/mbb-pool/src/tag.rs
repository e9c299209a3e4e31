//! Pool tags stamped on every allocation for leak diagnostics.

/// The closed set of diagnostic tags this driver allocates under.
///
/// Tag values are the classic 4-character pool tags ("MBC0".."MBC6"),
/// stored little-endian so that the characters read forward in a memory
/// dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTag {
    /// Catch-all allocations.
    Default,
    /// NTB frames being assembled for transmission.
    NtbSend,
    /// NBL bookkeeping on the send path.
    NblSend,
    /// NB bookkeeping on the send path.
    NbSend,
    /// MDLs describing receive buffers.
    MdlReceive,
}

impl PoolTag {
    /// Every tag, in declaration order.
    pub const ALL: [PoolTag; 5] = [
        PoolTag::Default,
        PoolTag::NtbSend,
        PoolTag::NblSend,
        PoolTag::NbSend,
        PoolTag::MdlReceive,
    ];

    /// The tag's 4 ASCII characters.
    pub const fn bytes(self) -> [u8; 4] {
        match self {
            PoolTag::Default => *b"MBC0",
            PoolTag::NtbSend => *b"MBC1",
            PoolTag::NblSend => *b"MBC2",
            PoolTag::NbSend => *b"MBC3",
            PoolTag::MdlReceive => *b"MBC6",
        }
    }

    /// The tag as the 32-bit value passed to the pool allocator.
    pub const fn as_u32(self) -> u32 {
        u32::from_le_bytes(self.bytes())
    }

    /// Dense index into per-tag statistics tables.
    pub(crate) const fn index(self) -> usize {
        match self {
            PoolTag::Default => 0,
            PoolTag::NtbSend => 1,
            PoolTag::NblSend => 2,
            PoolTag::NbSend => 3,
            PoolTag::MdlReceive => 4,
        }
    }
}

impl core::fmt::Display for PoolTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let bytes = self.bytes();
        for byte in bytes {
            f.write_fmt(format_args!("{}", byte as char))?;
        }
        Ok(())
    }
}
