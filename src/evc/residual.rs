//! Transform coefficient decoding
//!
//! Coefficients are coded as `(run, level, sign)` triples placed along
//! a zig-zag scan of the transform block, terminated by a last flag or
//! by reaching the final scan position.

use super::bitstream::{BitCursor, ByteSource};
use super::sbac::{Sbac, SbacContext};
use crate::error::EvcError;
use alloc::vec::Vec;

type Result<T> = core::result::Result<T, EvcError>;

/// Log2 of the maximum transform size
pub const MAX_TR_LOG2: u32 = 6;

/// Maximum transform size in samples
pub const MAX_TR_SIZE: u32 = 1 << MAX_TR_LOG2;

/// Maximum coefficient count of one transform block
pub const MAX_TR_DIM: usize = (MAX_TR_SIZE * MAX_TR_SIZE) as usize;

/// Zig-zag scan position permutations for every transform shape.
///
/// `zigzag(log2_w, log2_h)` maps a linear scan index to the raster
/// position inside a `2^log2_w x 2^log2_h` block. Built once and
/// consumed read-only by the coefficient decoder.
#[derive(Debug, Clone)]
pub struct ScanTables {
    zigzag: Vec<Vec<u16>>,
}

impl ScanTables {
    /// Build scan tables for all shapes up to the maximum transform size
    pub fn new() -> Self {
        let n = MAX_TR_LOG2 as usize;
        let mut zigzag = Vec::with_capacity(n * n);
        for log2_w in 1..=MAX_TR_LOG2 {
            for log2_h in 1..=MAX_TR_LOG2 {
                zigzag.push(init_zigzag(1 << log2_w, 1 << log2_h));
            }
        }
        Self { zigzag }
    }

    /// Scan table for a `2^log2_w x 2^log2_h` block
    pub fn zigzag(&self, log2_w: u32, log2_h: u32) -> &[u16] {
        debug_assert!((1..=MAX_TR_LOG2).contains(&log2_w));
        debug_assert!((1..=MAX_TR_LOG2).contains(&log2_h));
        let idx = (log2_w - 1) * MAX_TR_LOG2 + (log2_h - 1);
        &self.zigzag[idx as usize]
    }
}

impl Default for ScanTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one zig-zag permutation, walking anti-diagonals with
/// alternating direction
fn init_zigzag(size_x: u16, size_y: u16) -> Vec<u16> {
    let mut scan = Vec::with_capacity(usize::from(size_x) * usize::from(size_y));
    scan.push(0);

    let num_line = size_x + size_y - 1;
    for l in 1..num_line {
        if l % 2 == 1 {
            // decreasing x
            let mut x = l.min(size_x - 1) as i32;
            let mut y = l.saturating_sub(size_x - 1) as i32;
            while x >= 0 && (y as u16) < size_y {
                scan.push(y as u16 * size_x + x as u16);
                x -= 1;
                y += 1;
            }
        } else {
            // increasing x
            let mut y = l.min(size_y - 1) as i32;
            let mut x = l.saturating_sub(size_y - 1) as i32;
            while y >= 0 && (x as u16) < size_x {
                scan.push(y as u16 * size_x + x as u16);
                x += 1;
                y -= 1;
            }
        }
    }

    scan
}

/// Decode the coefficients of one transform block along `scan`.
///
/// `coef` must hold the block's raster layout and be zeroed by the
/// caller; positions the scan does not touch stay zero. Runs and levels
/// use the chroma context offsets when `is_luma` is false.
pub(crate) fn decode_run_length<S: ByteSource>(
    bs: &mut BitCursor<S>,
    sbac: &mut Sbac,
    ctx: &mut SbacContext,
    scan: &[u16],
    coef: &mut [i16],
    is_luma: bool,
) -> Result<()> {
    let num_coeff = scan.len();
    let t0 = if is_luma { 0 } else { 2 };
    let ctx_last = if is_luma { 0 } else { 1 };
    let mut scan_pos = 0usize;

    loop {
        let run = sbac.read_unary_sym(bs, &mut ctx.run[t0..t0 + 2])? as usize;
        if scan_pos + run >= num_coeff {
            return Err(EvcError::MalformedBitstream("coefficient run past block end"));
        }
        for i in scan_pos..scan_pos + run {
            coef[usize::from(scan[i])] = 0;
        }
        scan_pos += run;

        let level = sbac.read_unary_sym(bs, &mut ctx.level[t0..t0 + 2])? + 1;
        if level > i16::MAX as u32 {
            return Err(EvcError::MalformedBitstream("coefficient level out of range"));
        }

        let sign = sbac.decode_bin_ep(bs)?;
        coef[usize::from(scan[scan_pos])] = if sign != 0 {
            -(level as i16)
        } else {
            level as i16
        };

        if scan_pos >= num_coeff - 1 {
            break;
        }
        scan_pos += 1;

        let last = sbac.decode_bin(bs, &mut ctx.last[ctx_last])?;
        if last != 0 {
            break;
        }
    }

    Ok(())
}

/// Copy a `2^log2_w x 2^log2_h` block between two strided buffers
pub(crate) fn block_copy(
    src: &[i16],
    src_stride: usize,
    dst: &mut [i16],
    dst_stride: usize,
    log2_w: u32,
    log2_h: u32,
) {
    let w = 1usize << log2_w;
    let h = 1usize << log2_h;
    for row in 0..h {
        let s = row * src_stride;
        let d = row * dst_stride;
        dst[d..d + w].copy_from_slice(&src[s..s + w]);
    }
}
