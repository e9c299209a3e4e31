//! Fixed NTB header layouts (NTH16/NTH32) and the validated block view.

use crate::ndp::chain::NdpIter;
use crate::validate::ValidationError;

/// Signature of a 16-bit NTB fixed header (`"NCMH"`).
pub const NTH16_SIGNATURE: u32 = u32::from_le_bytes(*b"NCMH");
/// Signature of a 32-bit NTB fixed header (`"ncmh"`).
pub const NTH32_SIGNATURE: u32 = u32::from_le_bytes(*b"ncmh");

/// Size of the 16-bit NTB fixed header.
pub const NTH16_LEN: usize = 12;
/// Size of the 32-bit NTB fixed header.
pub const NTH32_LEN: usize = 16;

/// Required alignment of NDP offsets within a 16-bit NTB.
pub const NTB16_NDP_ALIGN: usize = 4;
/// Required alignment of NDP offsets within a 32-bit NTB.
pub const NTB32_NDP_ALIGN: usize = 8;

/// On-wire layout of the 16-bit NTB fixed header.
///
/// All fields are little-endian.
#[derive(Clone, Copy, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct RawNth16 {
    signature: u32,
    header_length: u16,
    sequence: u16,
    block_length: u16,
    ndp_index: u16,
}

/// On-wire layout of the 32-bit NTB fixed header.
///
/// All fields are little-endian.
#[derive(Clone, Copy, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct RawNth32 {
    signature: u32,
    header_length: u16,
    sequence: u16,
    block_length: u32,
    ndp_index: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawNth16>(), NTH16_LEN);
static_assertions::const_assert_eq!(core::mem::size_of::<RawNth32>(), NTH32_LEN);

/// Which of the two on-wire NTB layouts to interpret a buffer as.
///
/// The variant in effect is negotiated out-of-band (via the device's NCM
/// parameter structure), so it is an input here rather than something
/// sniffed from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtbVariant {
    /// 16-bit offset/length fields (NTH16/NDP16).
    Ntb16,
    /// 32-bit offset/length fields (NTH32/NDP32).
    Ntb32,
}

impl NtbVariant {
    /// Expected fixed header signature for this variant.
    pub const fn signature(self) -> u32 {
        match self {
            NtbVariant::Ntb16 => NTH16_SIGNATURE,
            NtbVariant::Ntb32 => NTH32_SIGNATURE,
        }
    }

    /// Size of the fixed NTB header for this variant.
    pub const fn header_len(self) -> usize {
        match self {
            NtbVariant::Ntb16 => NTH16_LEN,
            NtbVariant::Ntb32 => NTH32_LEN,
        }
    }

    /// Required alignment of every NDP offset in the block.
    pub const fn ndp_align(self) -> usize {
        match self {
            NtbVariant::Ntb16 => NTB16_NDP_ALIGN,
            NtbVariant::Ntb32 => NTB32_NDP_ALIGN,
        }
    }

    /// Size of the fixed portion of an NDP for this variant.
    pub const fn ndp_fixed_len(self) -> usize {
        match self {
            NtbVariant::Ntb16 => crate::ndp::NDP16_FIXED_LEN,
            NtbVariant::Ntb32 => crate::ndp::NDP32_FIXED_LEN,
        }
    }

    /// Minimum declared length of an NDP for this variant.
    pub const fn ndp_min_len(self) -> usize {
        match self {
            NtbVariant::Ntb16 => crate::ndp::NDP16_MIN_LEN,
            NtbVariant::Ntb32 => crate::ndp::NDP32_MIN_LEN,
        }
    }

    /// Size of one datagram pointer pair for this variant.
    pub const fn datagram_pair_len(self) -> usize {
        match self {
            NtbVariant::Ntb16 => crate::ndp::NDP16_PAIR_LEN,
            NtbVariant::Ntb32 => crate::ndp::NDP32_PAIR_LEN,
        }
    }
}

/// Decoded fields of a validated NTB fixed header.
///
/// 16-bit fields are widened so that both variants share one
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtbHeader {
    /// Declared size of the fixed header.
    pub header_length: u16,
    /// Block sequence number assigned by the device.
    pub sequence: u16,
    /// Declared size of the whole block, which must match the received
    /// transfer length exactly.
    pub block_length: u32,
    /// Offset of the first NDP, or 0 if the block carries none.
    pub ndp_index: u32,
}

/// A validated, read-only view over one received NTB.
///
/// Constructing an [`NtbView`] proves that the fixed header is coherent
/// with the physically received length; it does not prove anything about
/// the NDP chain beyond the first offset. The chain is checked entry by
/// entry as [`NtbView::ndps`] is driven.
///
/// The view borrows the transfer buffer and never outlives it; nothing is
/// copied out besides the fixed header fields.
#[derive(Debug, Clone, Copy)]
pub struct NtbView<'buf> {
    buf: &'buf [u8],
    variant: NtbVariant,
    header: NtbHeader,
}

impl<'buf> NtbView<'buf> {
    /// Parses and validates the fixed NTB header of `buf`.
    ///
    /// Checks, in order: minimum length, signature, declared block length
    /// against the received length, declared header length, and the first
    /// NDP offset (range and alignment). An NDP index of 0 is accepted and
    /// denotes an empty block.
    pub fn parse(buf: &'buf [u8], variant: NtbVariant) -> Result<Self, ValidationError> {
        if buf.len() < variant.header_len() {
            return Err(ValidationError::TooShort);
        }

        let header = match variant {
            NtbVariant::Ntb16 => {
                let raw: RawNth16 = bytemuck::pod_read_unaligned(&buf[..NTH16_LEN]);
                if u32::from_le(raw.signature) != NTH16_SIGNATURE {
                    return Err(ValidationError::BadSignature);
                }
                NtbHeader {
                    header_length: u16::from_le(raw.header_length),
                    sequence: u16::from_le(raw.sequence),
                    block_length: u16::from_le(raw.block_length) as u32,
                    ndp_index: u16::from_le(raw.ndp_index) as u32,
                }
            }
            NtbVariant::Ntb32 => {
                let raw: RawNth32 = bytemuck::pod_read_unaligned(&buf[..NTH32_LEN]);
                if u32::from_le(raw.signature) != NTH32_SIGNATURE {
                    return Err(ValidationError::BadSignature);
                }
                NtbHeader {
                    header_length: u16::from_le(raw.header_length),
                    sequence: u16::from_le(raw.sequence),
                    block_length: u32::from_le(raw.block_length),
                    ndp_index: u32::from_le(raw.ndp_index),
                }
            }
        };

        // The device must declare exactly what was physically received;
        // a shorted or padded transfer is not trusted in part.
        if header.block_length as usize != buf.len() {
            return Err(ValidationError::LengthMismatch);
        }

        if header.header_length as usize != variant.header_len() {
            return Err(ValidationError::Malformed);
        }

        let ndp_index = header.ndp_index as usize;
        if ndp_index != 0 {
            let in_range = ndp_index >= variant.header_len() && ndp_index < buf.len();
            if !in_range || ndp_index % variant.ndp_align() != 0 {
                return Err(ValidationError::OffsetOutOfRange);
            }
        }

        Ok(Self {
            buf,
            variant,
            header,
        })
    }

    /// The raw transfer this view was parsed from.
    pub fn buffer(&self) -> &'buf [u8] {
        self.buf
    }

    /// Which on-wire layout the view was parsed as.
    pub fn variant(&self) -> NtbVariant {
        self.variant
    }

    /// The decoded fixed header fields.
    pub fn header(&self) -> &NtbHeader {
        &self.header
    }

    /// Creates an iterator over the NDPs linked from this block's header.
    ///
    /// Each entry is validated as it is reached; the iterator yields the
    /// first [`ValidationError`] encountered and then fuses.
    pub fn ndps(&self) -> NdpIter<'buf> {
        NdpIter::new(self.buf, self.variant, self.header.ndp_index)
    }
}
