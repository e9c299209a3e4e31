//! NDP (NTB Datagram Pointer table) layouts and entry views.

use crate::ntb::NtbVariant;

pub mod chain;

/// Size of the fixed portion of a 16-bit NDP.
pub const NDP16_FIXED_LEN: usize = 8;
/// Size of the fixed portion of a 32-bit NDP.
pub const NDP32_FIXED_LEN: usize = 16;

/// Minimum declared length of a 16-bit NDP (fixed portion plus one
/// datagram pair and the null terminator pair).
pub const NDP16_MIN_LEN: usize = 16;
/// Minimum declared length of a 32-bit NDP.
pub const NDP32_MIN_LEN: usize = 32;

/// Size of one 16-bit datagram pointer pair (`wDatagramIndex`,
/// `wDatagramLength`).
pub const NDP16_PAIR_LEN: usize = 4;
/// Size of one 32-bit datagram pointer pair.
pub const NDP32_PAIR_LEN: usize = 8;

/// On-wire layout of the 16-bit NDP fixed portion.
#[derive(Clone, Copy, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct RawNdp16 {
    signature: u32,
    length: u16,
    next_ndp_index: u16,
}

/// On-wire layout of the 32-bit NDP fixed portion.
#[derive(Clone, Copy, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct RawNdp32 {
    signature: u32,
    length: u16,
    reserved6: u16,
    next_ndp_index: u32,
    reserved12: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RawNdp16>(), NDP16_FIXED_LEN);
static_assertions::const_assert_eq!(core::mem::size_of::<RawNdp32>(), NDP32_FIXED_LEN);

/// A recognized NDP signature family.
///
/// NCM carries plain Ethernet frames; MBIM multiplexes IP ("IPS") and
/// device-service ("DSS") streams, with the session id packed into the
/// fourth signature byte. 32-bit blocks use the lower-cased prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdpSignature {
    /// `"NCM0"`/`"ncm0"` (and the `1` forms when a trailing CRC is in use).
    Ncm {
        /// Whether datagrams carry a trailing CRC32.
        crc: bool,
    },
    /// MBIM IP stream, `"IPS" + session`.
    Ips {
        /// Multiplexing session the datagrams belong to.
        session: u8,
    },
    /// MBIM device service stream, `"DSS" + session`.
    Dss {
        /// Multiplexing session the datagrams belong to.
        session: u8,
    },
}

impl NdpSignature {
    /// Decodes a signature dword against the families valid for `variant`,
    /// or `None` if it matches none of them.
    pub fn decode(value: u32, variant: NtbVariant) -> Option<Self> {
        let bytes = value.to_le_bytes();
        let (prefix, tail) = ([bytes[0], bytes[1], bytes[2]], bytes[3]);

        let sig = match (variant, &prefix) {
            (NtbVariant::Ntb16, b"NCM") | (NtbVariant::Ntb32, b"ncm") => match tail {
                b'0' => NdpSignature::Ncm { crc: false },
                b'1' => NdpSignature::Ncm { crc: true },
                _ => return None,
            },
            (NtbVariant::Ntb16, b"IPS") | (NtbVariant::Ntb32, b"ips") => {
                NdpSignature::Ips { session: tail }
            }
            (NtbVariant::Ntb16, b"DSS") | (NtbVariant::Ntb32, b"dss") => {
                NdpSignature::Dss { session: tail }
            }
            _ => return None,
        };

        Some(sig)
    }

    /// The MBIM session id, if this is a multiplexed stream signature.
    pub fn session_id(self) -> Option<u8> {
        match self {
            NdpSignature::Ncm { .. } => None,
            NdpSignature::Ips { session } | NdpSignature::Dss { session } => Some(session),
        }
    }
}

/// One datagram pointer pair from an NDP table.
///
/// 16-bit fields are widened so that both variants share one
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramPointer {
    /// Offset of the datagram from the start of the block.
    pub index: u32,
    /// Length of the datagram in bytes.
    pub length: u32,
}

impl DatagramPointer {
    /// Whether this is the null pair terminating the table.
    pub fn is_null(self) -> bool {
        self.index == 0 && self.length == 0
    }
}

/// A validated view of one NDP within a block.
///
/// Produced by [`chain::NdpIter`]; by construction the fixed portion and
/// the declared `length` bytes all lie within the block.
#[derive(Debug, Clone, Copy)]
pub struct NdpEntry<'buf> {
    buf: &'buf [u8],
    variant: NtbVariant,
    offset: u32,
    signature: NdpSignature,
    length: u32,
    next_ndp_index: u32,
}

impl<'buf> NdpEntry<'buf> {
    /// Reads the already range-checked NDP fixed portion at `offset`.
    ///
    /// The chain walker is responsible for every bounds, alignment, and
    /// signature check; this only decodes fields.
    pub(crate) fn read(
        buf: &'buf [u8],
        variant: NtbVariant,
        offset: u32,
        signature: NdpSignature,
    ) -> Self {
        let start = offset as usize;
        let (length, next_ndp_index) = match variant {
            NtbVariant::Ntb16 => {
                let raw: RawNdp16 =
                    bytemuck::pod_read_unaligned(&buf[start..start + NDP16_FIXED_LEN]);
                (
                    u16::from_le(raw.length) as u32,
                    u16::from_le(raw.next_ndp_index) as u32,
                )
            }
            NtbVariant::Ntb32 => {
                let raw: RawNdp32 =
                    bytemuck::pod_read_unaligned(&buf[start..start + NDP32_FIXED_LEN]);
                (
                    u16::from_le(raw.length) as u32,
                    u32::from_le(raw.next_ndp_index),
                )
            }
        };

        Self {
            buf,
            variant,
            offset,
            signature,
            length,
            next_ndp_index,
        }
    }

    /// Offset of this NDP from the start of the block.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The decoded signature family.
    pub fn signature(&self) -> NdpSignature {
        self.signature
    }

    /// The NDP's declared length in bytes (fixed portion plus the
    /// datagram pointer table).
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Offset of the next NDP in the chain, or 0 at the end.
    pub fn next_ndp_index(&self) -> u32 {
        self.next_ndp_index
    }

    /// The MBIM session id, if this is a multiplexed stream NDP.
    pub fn session_id(&self) -> Option<u8> {
        self.signature.session_id()
    }

    /// Number of datagram pointer pairs in the table, including the null
    /// terminator pair.
    pub fn datagram_count(&self) -> u32 {
        let table = self.length as usize - self.variant.ndp_fixed_len();
        (table / self.variant.datagram_pair_len()) as u32
    }

    /// Creates an iterator over the datagram pointer pairs of this NDP.
    pub fn datagrams(&self) -> DatagramIter<'buf> {
        let start = self.offset as usize + self.variant.ndp_fixed_len();
        let end = self.offset as usize + self.length as usize;
        DatagramIter {
            table: &self.buf[start..end],
            variant: self.variant,
        }
    }
}

/// An iterator over the datagram pointer pairs of one NDP.
///
/// Yields every pair in the table, the null terminator included.
pub struct DatagramIter<'buf> {
    table: &'buf [u8],
    variant: NtbVariant,
}

impl Iterator for DatagramIter<'_> {
    type Item = DatagramPointer;

    fn next(&mut self) -> Option<Self::Item> {
        let pair_len = self.variant.datagram_pair_len();
        if self.table.len() < pair_len {
            return None;
        }

        let (pair, rest) = self.table.split_at(pair_len);
        self.table = rest;

        let pointer = match self.variant {
            NtbVariant::Ntb16 => DatagramPointer {
                index: u16::from_le_bytes([pair[0], pair[1]]) as u32,
                length: u16::from_le_bytes([pair[2], pair[3]]) as u32,
            },
            NtbVariant::Ntb32 => DatagramPointer {
                index: u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]),
                length: u32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]),
            },
        };

        Some(pointer)
    }
}

impl core::iter::FusedIterator for DatagramIter<'_> {}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use crate::test::well_formed_ntb16;
    use crate::{DatagramPointer, NdpSignature, NtbVariant, NtbView};

    #[test]
    fn decode_signature_families() {
        let sig = |bytes: [u8; 4]| u32::from_le_bytes(bytes);

        assert_eq!(
            NdpSignature::decode(sig(*b"NCM0"), NtbVariant::Ntb16),
            Some(NdpSignature::Ncm { crc: false })
        );
        assert_eq!(
            NdpSignature::decode(sig(*b"NCM1"), NtbVariant::Ntb16),
            Some(NdpSignature::Ncm { crc: true })
        );
        assert_eq!(
            NdpSignature::decode(sig(*b"IPS\x02"), NtbVariant::Ntb16),
            Some(NdpSignature::Ips { session: 2 })
        );
        assert_eq!(
            NdpSignature::decode(sig(*b"DSS\x07"), NtbVariant::Ntb16),
            Some(NdpSignature::Dss { session: 7 })
        );

        // 32-bit blocks use the lower-cased prefixes, exclusively
        assert_eq!(
            NdpSignature::decode(sig(*b"ips\x01"), NtbVariant::Ntb32),
            Some(NdpSignature::Ips { session: 1 })
        );
        assert_eq!(NdpSignature::decode(sig(*b"ips\x01"), NtbVariant::Ntb16), None);
        assert_eq!(NdpSignature::decode(sig(*b"IPS\x01"), NtbVariant::Ntb32), None);
        assert_eq!(NdpSignature::decode(sig(*b"NCM2"), NtbVariant::Ntb16), None);
        assert_eq!(NdpSignature::decode(sig(*b"XYZ\x00"), NtbVariant::Ntb16), None);
    }

    #[test]
    fn entry_exposes_datagram_pairs() {
        let buf = well_formed_ntb16();
        let view = NtbView::parse(&buf, NtbVariant::Ntb16).unwrap();
        let entry = view.ndps().next().unwrap().unwrap();

        assert_eq!(entry.offset(), 12);
        assert_eq!(entry.length(), 16);
        assert_eq!(entry.next_ndp_index(), 0);
        assert_eq!(entry.session_id(), Some(0));
        assert_eq!(entry.datagram_count(), 2);

        let pairs: Vec<DatagramPointer> = entry.datagrams().collect();
        assert_eq!(
            pairs,
            &[
                DatagramPointer {
                    index: 28,
                    length: 12
                },
                DatagramPointer {
                    index: 0,
                    length: 0
                },
            ]
        );
        assert!(pairs[1].is_null());
        assert!(!pairs[0].is_null());
    }
}
