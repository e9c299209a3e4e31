//! Helper utilities for parsing and validating NCM/MBIM Network Transfer
//! Blocks (NTBs) received from a mobile broadband device.
//!
//! Wire layouts and signature values follow the USB NCM 1.0 and MBIM 1.0
//! specifications.
#![no_std]
#![deny(unsafe_op_in_unsafe_fn, clippy::multiple_unsafe_ops_per_block)]

extern crate alloc;

// During tests, allow importing std
#[cfg(any(test))]
extern crate std;

pub mod ndp;
pub mod ntb;
pub mod validate;

pub use ndp::{chain::NdpIter, DatagramPointer, NdpEntry, NdpSignature};
pub use ntb::{NtbHeader, NtbVariant, NtbView};
pub use validate::{validate, NdpCount, ValidationError};

// NtbView: borrowed, already-validated header over the raw transfer
// - NdpIter walks the NDP chain with the same guards as `validate`,
//   so downstream code never re-checks offsets
//
// NdpEntry: borrowed view of one datagram pointer table
// - datagram pairs include the null terminator entry, callers that only
//   want real datagrams filter on `DatagramPointer::is_null`
