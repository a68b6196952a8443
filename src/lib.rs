//! Pure Rust MPEG-5 EVC baseline entropy decoder
//!
//! This crate implements the entropy-decoding core of an EVC
//! (ISO/IEC 23094-1) baseline-profile video decoder: a bit-level cursor
//! over the compressed buffer, the context-adaptive binary arithmetic
//! (SBAC) decoder, and the syntax layer that turns coded bits into NAL
//! headers, parameter sets, slice headers and per-coding-unit
//! prediction, motion and residual data.
//!
//! Sample reconstruction, motion derivation, reference picture
//! management and container demuxing are out of scope; decoded syntax
//! is handed to the caller as [`evc::cu::CuRecord`]s and as state
//! written into [`evc::map::NeighborMaps`].
//!
//! # Example
//!
//! ```ignore
//! use evc_entropy::evc::{self, bitstream::BitCursor, cu::SliceDecoder};
//!
//! for nal in evc::bitstream::split_nal_units(&data)? {
//!     match evc::parse_nal_payload(nal, sps.as_ref())? {
//!         evc::NalPayload::Sps(s) => sps = Some(s),
//!         evc::NalPayload::Slice { header, data_offset, .. } => {
//!             let bs = BitCursor::from_slice(&nal[data_offset..]);
//!             let mut dec = SliceDecoder::new(&sps, &pps, &header, bs, collab)?;
//!             dec.decode_slice(&mut maps, None, |cu| reconstruct(cu))?;
//!         }
//!         _ => {}
//!     }
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

mod error;
pub mod evc;

pub use error::{EvcError, Result};
