//! EVC baseline entropy decoding
//!
//! This module recovers syntax values from an EVC baseline bitstream:
//! NAL framing and headers, parameter sets, slice headers, and the
//! arithmetic-coded per-coding-unit syntax. Sample reconstruction,
//! motion derivation and picture buffering are the caller's concern;
//! decoded units arrive as [`cu::CuRecord`]s and as state written into
//! the caller's [`map::NeighborMaps`].

pub mod bitstream;
pub mod cu;
pub mod map;
pub mod params;
pub mod residual;
pub mod sbac;
pub mod sei;
pub mod slice;
pub mod trace;

#[cfg(test)]
pub(crate) mod testenc;

use crate::error::EvcError;
use bitstream::{BitCursor, NalType, NalUnitHeader};
use params::{Pps, Sps};
use sei::SeiPayload;
use slice::SliceHeader;

type Result<T> = core::result::Result<T, EvcError>;

/// Parsed content of one NAL unit payload
#[derive(Debug)]
pub enum NalPayload {
    /// Sequence parameter set
    Sps(Sps),
    /// Picture parameter set
    Pps(Pps),
    /// Slice header; the arithmetic-coded unit data starts at
    /// `data_offset` bytes into the payload
    Slice {
        /// NAL unit header
        nalu: NalUnitHeader,
        /// Parsed slice header
        header: SliceHeader,
        /// Byte offset of the slice data within the payload
        data_offset: usize,
    },
    /// Supplemental metadata
    Sei(SeiPayload),
    /// Filler data, skipped
    Filler,
}

/// Parse one NAL unit payload up to (but not including) its
/// arithmetic-coded slice data.
///
/// Slice and SEI payloads need the active SPS; passing a slice or SEI
/// NAL before any SPS is a malformed stream. Decoding the unit data of
/// a slice is the caller's next step via [`cu::SliceDecoder`].
pub fn parse_nal_payload(payload: &[u8], sps: Option<&Sps>) -> Result<NalPayload> {
    let mut bs = BitCursor::from_slice(payload);
    let nalu = NalUnitHeader::read(&mut bs)?;

    match nalu.nal_type {
        NalType::Sps => Ok(NalPayload::Sps(Sps::read(&mut bs)?)),
        NalType::Pps => Ok(NalPayload::Pps(Pps::read(&mut bs)?)),
        NalType::NonIdr | NalType::Idr => {
            let sps = sps.ok_or(EvcError::MalformedBitstream("slice before parameter sets"))?;
            let header = SliceHeader::read(&mut bs, sps, nalu.nal_type)?;
            Ok(NalPayload::Slice {
                nalu,
                header,
                data_offset: bs.bytes_consumed(),
            })
        }
        NalType::Sei => {
            let sps = sps.ok_or(EvcError::MalformedBitstream("SEI before parameter sets"))?;
            let num_planes = if sps.has_chroma() { 3 } else { 1 };
            Ok(NalPayload::Sei(sei::read_sei(&mut bs, num_planes)?))
        }
        NalType::Fd => Ok(NalPayload::Filler),
        _ => Err(EvcError::MalformedBitstream("unrecognized NAL unit type")),
    }
}
