//! Whole-block validation of a received NTB.

use crate::ntb::{NtbVariant, NtbView};

/// Number of datagram pointer pairs found across a block's NDP chain.
///
/// 0 is a valid count: a block whose NDP index is 0 carries no datagrams.
pub type NdpCount = u32;

/// Why a received block was rejected.
///
/// Every rejection is terminal for the block; retrying a malformed
/// transfer cannot succeed. The receive path drops the block and moves on
/// to the next transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The buffer is smaller than the variant's fixed header.
    TooShort,
    /// A header or NDP signature matched none of the expected values.
    BadSignature,
    /// The declared block length differs from the received length.
    LengthMismatch,
    /// An offset or extent reaches outside the received buffer, or an NDP
    /// offset breaks the variant's alignment rule.
    OffsetOutOfRange,
    /// A structurally invalid field, such as an undersized or misaligned
    /// NDP length.
    Malformed,
    /// The NDP chain links back to an already visited entry.
    CycleDetected,
}

impl core::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let message = match self {
            ValidationError::TooShort => "buffer shorter than the fixed NTB header",
            ValidationError::BadSignature => "unrecognized NTB or NDP signature",
            ValidationError::LengthMismatch => "declared block length does not match the transfer",
            ValidationError::OffsetOutOfRange => "offset or extent outside the received buffer",
            ValidationError::Malformed => "structurally invalid NTB field",
            ValidationError::CycleDetected => "NDP chain contains a cycle",
        };
        f.write_str(message)
    }
}

/// Validates a received block and counts its datagram pointer pairs.
///
/// A pure parse over the immutable `buffer`: either every header, NDP,
/// offset, and length checks out and the accumulated pair count is
/// returned, or the first defect is reported and the block must be
/// dropped whole. No partial results are produced, and validating the
/// same bytes twice yields the same answer.
pub fn validate(buffer: &[u8], variant: NtbVariant) -> Result<NdpCount, ValidationError> {
    let view = NtbView::parse(buffer, variant)?;

    let mut count: NdpCount = 0;
    for entry in view.ndps() {
        count += entry?.datagram_count();
    }

    Ok(count)
}
