//! Walking the singly-linked chain of NDPs inside a block.

use alloc::vec::Vec;

use crate::ndp::{NdpEntry, NdpSignature};
use crate::ntb::NtbVariant;
use crate::validate::ValidationError;

/// An iterator over the NDPs of one block, validating each entry as it is
/// reached.
///
/// The chain lives inside untrusted device memory, so every link is
/// treated as hostile: offsets are range- and alignment-checked before
/// the fixed portion is read, declared lengths are checked against the
/// block, and a visited-offset set guarantees the walk terminates even
/// when the `next` links form a loop.
///
/// Yields `Err` once for the first malformed entry or link, then fuses.
pub struct NdpIter<'buf> {
    buf: &'buf [u8],
    variant: NtbVariant,
    /// Offset of the next NDP to yield; `None` once the chain ended or
    /// an error was reported.
    next: Option<u32>,
    /// Every NDP offset already yielded, for loop detection.
    visited: Vec<u32>,
}

impl<'buf> NdpIter<'buf> {
    /// Creates a walker starting at `first_ndp`, with 0 meaning an empty
    /// chain.
    ///
    /// `first_ndp` must already be range- and alignment-checked (the
    /// [`NtbView`](crate::NtbView) constructor does this); links found
    /// while walking are checked here.
    pub(crate) fn new(buf: &'buf [u8], variant: NtbVariant, first_ndp: u32) -> Self {
        Self {
            buf,
            variant,
            next: (first_ndp != 0).then_some(first_ndp),
            visited: Vec::new(),
        }
    }

    fn read_entry(&self, offset: u32) -> Result<NdpEntry<'buf>, ValidationError> {
        let start = offset as usize;

        // The fixed portion must be readable before anything else is
        // decoded from it
        let fixed_len = self.variant.ndp_fixed_len();
        if start + fixed_len > self.buf.len() {
            return Err(ValidationError::OffsetOutOfRange);
        }

        let signature = u32::from_le_bytes([
            self.buf[start],
            self.buf[start + 1],
            self.buf[start + 2],
            self.buf[start + 3],
        ]);
        let signature = NdpSignature::decode(signature, self.variant)
            .ok_or(ValidationError::BadSignature)?;

        let entry = NdpEntry::read(self.buf, self.variant, offset, signature);

        let length = entry.length() as usize;
        if length < self.variant.ndp_min_len() || length % self.variant.datagram_pair_len() != 0 {
            return Err(ValidationError::Malformed);
        }
        if start + length > self.buf.len() {
            return Err(ValidationError::OffsetOutOfRange);
        }

        Ok(entry)
    }

    fn check_link(&self, next: u32) -> Result<(), ValidationError> {
        let next = next as usize;
        let in_range = next >= self.variant.header_len() && next < self.buf.len();
        if !in_range || next % self.variant.ndp_align() != 0 {
            return Err(ValidationError::OffsetOutOfRange);
        }
        if self.visited.contains(&(next as u32)) {
            return Err(ValidationError::CycleDetected);
        }
        Ok(())
    }
}

impl<'buf> Iterator for NdpIter<'buf> {
    type Item = Result<NdpEntry<'buf>, ValidationError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        self.visited.push(offset);

        let entry = match self.read_entry(offset) {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err)),
        };

        let next = entry.next_ndp_index();
        if next != 0 {
            if let Err(err) = self.check_link(next) {
                return Some(Err(err));
            }
            self.next = Some(next);
        }

        Some(Ok(entry))
    }
}

impl core::iter::FusedIterator for NdpIter<'_> {}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use crate::test::{nth16, pad_to, push_ndp16};
    use crate::{NdpSignature, NtbVariant, NtbView, ValidationError};

    fn first_error(buf: &[u8]) -> ValidationError {
        let view = NtbView::parse(buf, NtbVariant::Ntb16).unwrap();
        view.ndps()
            .find_map(|entry| entry.err())
            .expect("chain should be rejected")
    }

    #[test]
    fn walks_a_two_ndp_chain() {
        // NDPs at 12 and 28, two sessions
        let mut buf = nth16(0, 48, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 28, &[(44, 4), (0, 0)]);
        push_ndp16(&mut buf, *b"IPS\x01", 16, 0, &[(44, 4), (0, 0)]);
        pad_to(&mut buf, 48);

        let view = NtbView::parse(&buf, NtbVariant::Ntb16).unwrap();
        let entries: Vec<_> = view.ndps().map(|entry| entry.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset(), 12);
        assert_eq!(entries[1].offset(), 28);
        assert_eq!(
            entries[1].signature(),
            NdpSignature::Ips { session: 1 }
        );
    }

    #[test]
    fn rejects_truncated_ndp() {
        // NDP declares 16 bytes but only 8 fit in the block
        let mut buf = nth16(0, 20, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 0, &[]);
        pad_to(&mut buf, 20);

        assert_eq!(first_error(&buf), ValidationError::OffsetOutOfRange);
    }

    #[test]
    fn rejects_undersized_ndp_length() {
        // wLength of 12 is below the 16-byte minimum
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"IPS\0", 12, 0, &[(0, 0)]);
        pad_to(&mut buf, 40);

        assert_eq!(first_error(&buf), ValidationError::Malformed);
    }

    #[test]
    fn rejects_unaligned_ndp_length() {
        // wLength of 18 is not a multiple of the 4-byte pair size
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"IPS\0", 18, 0, &[(0, 0)]);
        pad_to(&mut buf, 40);

        assert_eq!(first_error(&buf), ValidationError::Malformed);
    }

    #[test]
    fn rejects_unknown_ndp_signature() {
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"XXX\0", 16, 0, &[(0, 0), (0, 0)]);
        pad_to(&mut buf, 40);

        assert_eq!(first_error(&buf), ValidationError::BadSignature);
    }

    #[test]
    fn detects_self_loop() {
        // Single NDP whose next link points back at itself
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 12, &[(0, 0), (0, 0)]);
        pad_to(&mut buf, 40);

        assert_eq!(first_error(&buf), ValidationError::CycleDetected);
    }

    #[test]
    fn detects_two_ndp_cycle() {
        // 12 -> 28 -> 12
        let mut buf = nth16(0, 48, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 28, &[(0, 0), (0, 0)]);
        push_ndp16(&mut buf, *b"IPS\0", 16, 12, &[(0, 0), (0, 0)]);
        pad_to(&mut buf, 48);

        assert_eq!(first_error(&buf), ValidationError::CycleDetected);
    }

    #[test]
    fn rejects_backward_link_into_header() {
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 4, &[(0, 0), (0, 0)]);
        pad_to(&mut buf, 40);

        assert_eq!(first_error(&buf), ValidationError::OffsetOutOfRange);
    }

    #[test]
    fn fuses_after_an_error() {
        let mut buf = nth16(0, 40, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 12, &[(0, 0), (0, 0)]);
        pad_to(&mut buf, 40);

        let view = NtbView::parse(&buf, NtbVariant::Ntb16).unwrap();
        let mut ndps = view.ndps();
        assert!(matches!(ndps.next(), Some(Err(ValidationError::CycleDetected))));
        assert!(ndps.next().is_none());
    }
}
