//! Test program for exercising the NTB validator from the host side.
//!
//! Generates well-formed Network Transfer Blocks, validates blocks from
//! disk, and applies targeted corruptions to check that each one is
//! caught.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use color_eyre::eyre::{bail, Result, WrapErr};
use mbb_rs::{ndp, ntb, NtbVariant};

const DEFAULT_DATAGRAM_LENGTH: u32 = 64;

#[derive(Clone, Copy, PartialEq, Eq, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct Nth16 {
    signature: u32,
    header_length: u16,
    sequence: u16,
    block_length: u16,
    ndp_index: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct Nth32 {
    signature: u32,
    header_length: u16,
    sequence: u16,
    block_length: u32,
    ndp_index: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct Ndp16Header {
    signature: u32,
    length: u16,
    next_ndp_index: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, bytemuck_derive::Zeroable, bytemuck_derive::Pod)]
#[repr(C, packed)]
struct Ndp32Header {
    signature: u32,
    length: u16,
    reserved6: u16,
    next_ndp_index: u32,
    reserved12: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CorruptKind {
    /// Drop the last byte of the block.
    Truncate,
    /// Flip a byte of the NTH signature.
    Signature,
    /// Bump the declared block length past the buffer.
    BlockLength,
    /// Shrink the declared header length.
    HeaderLength,
    /// Point the first NDP index past the end of the block.
    NdpIndex,
    /// Make the first NDP link back to itself.
    Cycle,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown corruption kind (expected one of truncate, signature, block-length, header-length, ndp-index, cycle)")]
struct UnknownCorruptKind;

impl FromStr for CorruptKind {
    type Err = UnknownCorruptKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "truncate" => Self::Truncate,
            "signature" => Self::Signature,
            "block-length" => Self::BlockLength,
            "header-length" => Self::HeaderLength,
            "ndp-index" => Self::NdpIndex,
            "cycle" => Self::Cycle,
            _ => return Err(UnknownCorruptKind),
        })
    }
}

#[derive(clap::Parser)]
struct Options {
    /// mode
    mode: Mode,
    /// block file to write (generate, corrupt) or read (validate)
    file: PathBuf,
    /// use the 32-bit block format
    #[arg(long, default_value_t)]
    ntb32: bool,
    /// number of sessions (one NDP each)
    #[arg(short = 's', default_value_t = 1)]
    sessions: u8,
    /// number of datagrams per session
    #[arg(short = 'd', default_value_t = 2)]
    datagrams: u32,
    #[arg(
        help = "length of each datagram (default: {DEFAULT_DATAGRAM_LENGTH})",
        short = 'l',
        default_value_t = DEFAULT_DATAGRAM_LENGTH,
    )]
    datagram_length: u32,
    /// which corruption to apply (corrupt mode)
    #[arg(short = 'c')]
    corruption: Option<CorruptKind>,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum Mode {
    Generate,
    Validate,
    Corrupt,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Options::try_parse()?;
    let variant = if opts.ntb32 {
        NtbVariant::Ntb32
    } else {
        NtbVariant::Ntb16
    };

    match opts.mode {
        Mode::Generate => {
            let block = generate_block(&opts, variant)?;
            report(&block, variant);

            std::fs::write(&opts.file, &block)
                .wrap_err_with(|| format!("failed to write {}", opts.file.display()))?;
            println!("wrote {} bytes to {}", block.len(), opts.file.display());
        }
        Mode::Validate => {
            let block = std::fs::read(&opts.file)
                .wrap_err_with(|| format!("failed to read {}", opts.file.display()))?;
            report(&block, variant);
        }
        Mode::Corrupt => {
            let Some(kind) = opts.corruption else {
                bail!("corrupt mode needs a corruption kind (-c)");
            };

            let mut block = std::fs::read(&opts.file)
                .wrap_err_with(|| format!("failed to read {}", opts.file.display()))?;
            corrupt_block(&mut block, variant, kind)?;
            report(&block, variant);

            std::fs::write(&opts.file, &block)
                .wrap_err_with(|| format!("failed to write {}", opts.file.display()))?;
            println!(
                "wrote corrupted block ({kind:?}) to {}",
                opts.file.display()
            );
        }
    }

    Ok(())
}

/// Builds a well-formed block: header, one chained NDP per session, then
/// the datagram payloads.
fn generate_block(opts: &Options, variant: NtbVariant) -> Result<Vec<u8>> {
    let sessions = usize::from(opts.sessions.max(1));
    // A table shorter than two pairs is undersized, so always carry at
    // least one datagram next to the terminator
    let datagrams = (opts.datagrams as usize).max(1);
    let datagram_length = opts.datagram_length as usize;

    // Every table carries a null terminator pair on top of its datagrams
    let ndp_len = variant.ndp_fixed_len() + (datagrams + 1) * variant.datagram_pair_len();
    let payload_start = variant.header_len() + sessions * ndp_len;
    let block_length = payload_start + sessions * datagrams * datagram_length;

    if matches!(variant, NtbVariant::Ntb16) && block_length > usize::from(u16::MAX) {
        bail!("block of {block_length} bytes does not fit a 16-bit block length");
    }

    let mut block = vec![0u8; block_length];

    match variant {
        NtbVariant::Ntb16 => {
            let header = Nth16 {
                signature: ntb::NTH16_SIGNATURE,
                header_length: ntb::NTH16_LEN as u16,
                sequence: 0,
                block_length: block_length as u16,
                ndp_index: ntb::NTH16_LEN as u16,
            };
            block[..ntb::NTH16_LEN].copy_from_slice(bytemuck::bytes_of(&header));
        }
        NtbVariant::Ntb32 => {
            let header = Nth32 {
                signature: ntb::NTH32_SIGNATURE,
                header_length: ntb::NTH32_LEN as u16,
                sequence: 0,
                block_length: block_length as u32,
                ndp_index: ntb::NTH32_LEN as u32,
            };
            block[..ntb::NTH32_LEN].copy_from_slice(bytemuck::bytes_of(&header));
        }
    }

    let mut payload_at = payload_start;

    for session in 0..sessions {
        let ndp_at = variant.header_len() + session * ndp_len;
        let last_session = session + 1 == sessions;
        let next_ndp = if last_session { 0 } else { ndp_at + ndp_len };

        let signature = match variant {
            NtbVariant::Ntb16 => u32::from_le_bytes([b'I', b'P', b'S', session as u8]),
            NtbVariant::Ntb32 => u32::from_le_bytes([b'i', b'p', b's', session as u8]),
        };

        let mut at = ndp_at;
        match variant {
            NtbVariant::Ntb16 => {
                let header = Ndp16Header {
                    signature,
                    length: ndp_len as u16,
                    next_ndp_index: next_ndp as u16,
                };
                block[at..at + ndp::NDP16_FIXED_LEN].copy_from_slice(bytemuck::bytes_of(&header));
                at += ndp::NDP16_FIXED_LEN;
            }
            NtbVariant::Ntb32 => {
                let header = Ndp32Header {
                    signature,
                    length: ndp_len as u16,
                    reserved6: 0,
                    next_ndp_index: next_ndp as u32,
                    reserved12: 0,
                };
                block[at..at + ndp::NDP32_FIXED_LEN].copy_from_slice(bytemuck::bytes_of(&header));
                at += ndp::NDP32_FIXED_LEN;
            }
        }

        // Datagram pointer pairs, then the null terminator (already zero)
        for _ in 0..datagrams {
            match variant {
                NtbVariant::Ntb16 => {
                    block[at..at + 2].copy_from_slice(&(payload_at as u16).to_le_bytes());
                    block[at + 2..at + 4]
                        .copy_from_slice(&(datagram_length as u16).to_le_bytes());
                }
                NtbVariant::Ntb32 => {
                    block[at..at + 4].copy_from_slice(&(payload_at as u32).to_le_bytes());
                    block[at + 4..at + 8]
                        .copy_from_slice(&(datagram_length as u32).to_le_bytes());
                }
            }
            at += variant.datagram_pair_len();

            for (idx, byte) in block[payload_at..payload_at + datagram_length]
                .iter_mut()
                .enumerate()
            {
                *byte = idx as u8;
            }
            payload_at += datagram_length;
        }
    }

    Ok(block)
}

fn corrupt_block(block: &mut Vec<u8>, variant: NtbVariant, kind: CorruptKind) -> Result<()> {
    if block.len() < variant.header_len() {
        bail!("block is too short to corrupt ({} bytes)", block.len());
    }

    match kind {
        CorruptKind::Truncate => {
            block.pop();
        }
        CorruptKind::Signature => {
            block[0] ^= 0xff;
        }
        CorruptKind::BlockLength => {
            bump_block_length(block, variant, 4);
        }
        CorruptKind::HeaderLength => {
            block[4] = block[4].wrapping_sub(2);
        }
        CorruptKind::NdpIndex => {
            let past_end = block.len() as u32;
            match variant {
                NtbVariant::Ntb16 => {
                    block[10..12].copy_from_slice(&(past_end as u16).to_le_bytes());
                }
                NtbVariant::Ntb32 => {
                    block[12..16].copy_from_slice(&past_end.to_le_bytes());
                }
            }
        }
        CorruptKind::Cycle => {
            // Re-point the first NDP's next index at the NDP itself
            let first_ndp = variant.header_len();
            match variant {
                NtbVariant::Ntb16 => {
                    let link = first_ndp + 6;
                    if block.len() < link + 2 {
                        bail!("block has no NDP to corrupt");
                    }
                    block[link..link + 2].copy_from_slice(&(first_ndp as u16).to_le_bytes());
                }
                NtbVariant::Ntb32 => {
                    let link = first_ndp + 8;
                    if block.len() < link + 4 {
                        bail!("block has no NDP to corrupt");
                    }
                    block[link..link + 4].copy_from_slice(&(first_ndp as u32).to_le_bytes());
                }
            }
        }
    }

    Ok(())
}

fn bump_block_length(block: &mut [u8], variant: NtbVariant, by: u32) {
    match variant {
        NtbVariant::Ntb16 => {
            let old = u16::from_le_bytes([block[8], block[9]]);
            block[8..10].copy_from_slice(&(old.wrapping_add(by as u16)).to_le_bytes());
        }
        NtbVariant::Ntb32 => {
            let old = u32::from_le_bytes([block[8], block[9], block[10], block[11]]);
            block[8..12].copy_from_slice(&(old.wrapping_add(by)).to_le_bytes());
        }
    }
}

fn report(block: &[u8], variant: NtbVariant) {
    match mbb_rs::validate(block, variant) {
        Ok(count) => {
            println!(
                "block is valid: {} bytes, {count} datagram pointer pairs",
                block.len()
            );
        }
        Err(err) => {
            println!("block was rejected: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;
    use mbb_rs::{NtbVariant, ValidationError};

    use crate::{corrupt_block, generate_block, CorruptKind, Options};

    fn options(args: &[&str]) -> Options {
        Options::try_parse_from(
            ["ntbtest", "generate", "out.bin"]
                .into_iter()
                .chain(args.iter().copied()),
        )
        .unwrap()
    }

    #[test]
    fn generated_blocks_validate() {
        let opts = options(&["-s", "2", "-d", "3"]);

        let block = generate_block(&opts, NtbVariant::Ntb16).unwrap();
        // 3 datagrams + terminator, for each of 2 sessions
        assert_eq!(mbb_rs::validate(&block, NtbVariant::Ntb16), Ok(8));

        let block = generate_block(&opts, NtbVariant::Ntb32).unwrap();
        assert_eq!(mbb_rs::validate(&block, NtbVariant::Ntb32), Ok(8));
    }

    #[test]
    fn oversized_16_bit_blocks_are_refused() {
        let opts = options(&["-d", "8", "-l", "16384"]);
        assert!(generate_block(&opts, NtbVariant::Ntb16).is_err());
    }

    #[test]
    fn each_corruption_is_caught() {
        let cases = [
            (CorruptKind::Truncate, ValidationError::LengthMismatch),
            (CorruptKind::Signature, ValidationError::BadSignature),
            (CorruptKind::BlockLength, ValidationError::LengthMismatch),
            (CorruptKind::HeaderLength, ValidationError::Malformed),
            (CorruptKind::NdpIndex, ValidationError::OffsetOutOfRange),
            (CorruptKind::Cycle, ValidationError::CycleDetected),
        ];

        for variant in [NtbVariant::Ntb16, NtbVariant::Ntb32] {
            for (kind, expected) in cases {
                let opts = options(&[]);
                let mut block = generate_block(&opts, variant).unwrap();
                corrupt_block(&mut block, variant, kind).unwrap();

                assert_eq!(
                    mbb_rs::validate(&block, variant),
                    Err(expected),
                    "{kind:?} on {variant:?}"
                );
            }
        }
    }
}
