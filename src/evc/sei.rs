//! Supplemental enhancement information payloads

use super::bitstream::{BitCursor, ByteSource};
use crate::error::EvcError;

type Result<T> = core::result::Result<T, EvcError>;

/// Picture signature payload type
pub const PAYLOAD_PIC_SIGNATURE: u32 = 0x10;

/// Picture signature (per-plane hash) carried in an SEI message
#[derive(Debug, Clone, Default)]
pub struct PictureSignature {
    /// Digest bytes per plane
    pub planes: [[u8; 16]; 3],
    /// Number of planes with a digest
    pub num_planes: usize,
    /// Digest length in bytes
    pub len: usize,
}

/// Parsed SEI payload
#[derive(Debug, Clone)]
pub enum SeiPayload {
    /// Picture signature hash
    PictureSignature(PictureSignature),
}

/// Read one SEI message.
///
/// `num_planes` is the picture plane count (1 for monochrome, 3
/// otherwise). The cursor must be byte-aligned on entry. Unrecognized
/// payload types fail with [`EvcError::UnexpectedPayload`].
pub fn read_sei<S: ByteSource>(bs: &mut BitCursor<S>, num_planes: usize) -> Result<SeiPayload> {
    if !bs.is_byte_aligned() {
        return Err(EvcError::MalformedBitstream("SEI not byte aligned"));
    }

    let payload_type = bs.read(8)?;
    let payload_size = bs.read(8)? as usize;

    match payload_type {
        PAYLOAD_PIC_SIGNATURE => {
            if payload_size > 16 {
                return Err(EvcError::MalformedBitstream("signature payload too large"));
            }
            if num_planes > 3 {
                return Err(EvcError::MalformedBitstream("too many picture planes"));
            }
            let mut sig = PictureSignature {
                num_planes,
                len: payload_size,
                ..PictureSignature::default()
            };
            for plane in sig.planes.iter_mut().take(num_planes) {
                for byte in plane.iter_mut().take(payload_size) {
                    *byte = bs.read(8)? as u8;
                }
            }
            Ok(SeiPayload::PictureSignature(sig))
        }
        other => Err(EvcError::UnexpectedPayload(other as u8)),
    }
}
