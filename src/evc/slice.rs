//! Slice header parsing

use super::bitstream::{BitCursor, ByteSource, NalType};
use super::params::{MAX_NUM_PPS, Sps};
use crate::error::EvcError;

type Result<T> = core::result::Result<T, EvcError>;

/// Slice type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SliceType {
    /// Bi-predictive slice
    B = 0,
    /// Predictive slice
    P = 1,
    /// Intra slice
    I = 2,
}

impl SliceType {
    /// Create from the coded slice type value
    pub fn from_u32(val: u32) -> Result<Self> {
        match val {
            0 => Ok(Self::B),
            1 => Ok(Self::P),
            2 => Ok(Self::I),
            _ => Err(EvcError::MalformedBitstream("slice_type out of range")),
        }
    }

    /// Whether this is an intra slice
    pub fn is_intra(self) -> bool {
        self == Self::I
    }

    /// Whether this slice uses inter prediction
    pub fn is_inter(self) -> bool {
        !self.is_intra()
    }
}

/// Parsed slice header
#[derive(Debug, Clone)]
pub struct SliceHeader {
    /// Referenced PPS id
    pub slice_pic_parameter_set_id: u32,
    /// Slice type
    pub slice_type: SliceType,
    /// No output of prior pictures (IDR slices)
    pub no_output_of_prior_pics_flag: bool,
    /// Active reference count override present
    pub num_ref_idx_active_override_flag: bool,
    /// Overridden active reference counts minus 1, per list
    pub num_ref_idx_active_minus1: [Option<u32>; 2],
    /// Deblocking filter enabled for this slice
    pub slice_deblocking_filter_flag: bool,
    /// Slice quantization parameter, `0..=51`
    pub qp: u8,
    /// Cb QP offset
    pub qp_u_offset: i32,
    /// Cr QP offset
    pub qp_v_offset: i32,
    /// Clipped Cb QP index at slice level
    pub qp_u: i8,
    /// Clipped Cr QP index at slice level
    pub qp_v: i8,
}

impl SliceHeader {
    /// Read a slice header from the cursor.
    ///
    /// `nal_type` selects the IDR-only fields. The cursor is left
    /// byte-aligned at the start of the arithmetic-coded slice data.
    pub fn read<S: ByteSource>(bs: &mut BitCursor<S>, sps: &Sps, nal_type: NalType) -> Result<Self> {
        let slice_pic_parameter_set_id = bs.read_ue()?;
        if slice_pic_parameter_set_id >= MAX_NUM_PPS {
            return Err(EvcError::MalformedBitstream("slice pps id out of range"));
        }

        let slice_type = SliceType::from_u32(bs.read_ue()?)?;

        let no_output_of_prior_pics_flag = if nal_type.is_idr() {
            bs.read_flag()?
        } else {
            false
        };

        let mut num_ref_idx_active_override_flag = false;
        let mut num_ref_idx_active_minus1 = [None, None];
        if slice_type.is_inter() {
            num_ref_idx_active_override_flag = bs.read_flag()?;
            if num_ref_idx_active_override_flag {
                num_ref_idx_active_minus1[0] = Some(bs.read_ue()?);
                if slice_type == SliceType::B {
                    num_ref_idx_active_minus1[1] = Some(bs.read_ue()?);
                }
            }
        }

        let slice_deblocking_filter_flag = bs.read_flag()?;

        let qp = bs.read(6)?;
        if qp > 51 {
            return Err(EvcError::MalformedBitstream("slice qp out of range"));
        }

        let qp_u_offset = bs.read_se()?;
        let qp_v_offset = bs.read_se()?;

        let min = -6 * sps.bit_depth_luma_minus8 as i32;
        let qp_u = (qp as i32 + qp_u_offset).clamp(min, 57) as i8;
        let qp_v = (qp as i32 + qp_v_offset).clamp(min, 57) as i8;

        bs.align_to_byte()?;

        Ok(Self {
            slice_pic_parameter_set_id,
            slice_type,
            no_output_of_prior_pics_flag,
            num_ref_idx_active_override_flag,
            num_ref_idx_active_minus1,
            slice_deblocking_filter_flag,
            qp: qp as u8,
            qp_u_offset,
            qp_v_offset,
            qp_u,
            qp_v,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::evc::bitstream::BitCursor;
    use crate::evc::params::Sps;
    use crate::evc::testenc::BitWriter;

    pub(crate) fn write_intra_slice_header(w: &mut BitWriter, qp: u32) {
        w.write_ue(0); // pps id
        w.write_ue(2); // slice_type I
        w.write(1, 1); // no_output_of_prior_pics_flag (IDR)
        w.write(1, 1); // slice_deblocking_filter_flag
        w.write(qp, 6);
        w.write_se(0); // qp_u_offset
        w.write_se(0); // qp_v_offset
        w.flush();
    }

    fn test_sps() -> Sps {
        let mut w = BitWriter::new();
        crate::evc::params::tests::write_minimal_sps(&mut w, 64, 64, 1);
        let bytes = w.into_bytes();
        let mut bs = BitCursor::from_slice(&bytes);
        Sps::read(&mut bs).unwrap()
    }

    #[test]
    fn test_slice_header_round_trip() {
        let sps = test_sps();
        let mut w = BitWriter::new();
        write_intra_slice_header(&mut w, 27);
        let bytes = w.into_bytes();

        let mut bs = BitCursor::from_slice(&bytes);
        let sh = SliceHeader::read(&mut bs, &sps, NalType::Idr).unwrap();
        assert_eq!(sh.slice_type, SliceType::I);
        assert_eq!(sh.qp, 27);
        assert_eq!(sh.qp_u, 27);
        assert!(sh.no_output_of_prior_pics_flag);
        assert!(bs.is_byte_aligned());
    }

    #[test]
    fn test_slice_qp_out_of_range() {
        let sps = test_sps();
        let mut w = BitWriter::new();
        write_intra_slice_header(&mut w, 52);
        let bytes = w.into_bytes();

        let mut bs = BitCursor::from_slice(&bytes);
        assert!(matches!(
            SliceHeader::read(&mut bs, &sps, NalType::Idr),
            Err(EvcError::MalformedBitstream(_))
        ));
    }

    #[test]
    fn test_slice_header_rejects_nonzero_padding() {
        let sps = test_sps();
        let mut w = BitWriter::new();
        w.write_ue(0); // pps id
        w.write_ue(2); // I
        w.write(1, 1); // no_output_of_prior_pics_flag
        w.write(1, 1); // deblocking
        w.write(27, 6);
        w.write_se(0);
        w.write_se(0);
        // force nonzero padding
        while !w.is_byte_aligned() {
            w.write1(1);
        }
        let bytes = w.into_bytes();

        let mut bs = BitCursor::from_slice(&bytes);
        assert!(matches!(
            SliceHeader::read(&mut bs, &sps, NalType::Idr),
            Err(EvcError::MalformedBitstream(_))
        ));
    }

    #[test]
    fn test_p_slice_header_override() {
        let sps = test_sps();
        let mut w = BitWriter::new();
        w.write_ue(0); // pps id
        w.write_ue(1); // P
        w.write(1, 1); // override flag
        w.write_ue(1); // num_ref_idx_active_minus1[0]
        w.write(0, 1); // deblocking
        w.write(30, 6);
        w.write_se(1);
        w.write_se(-1);
        w.flush();
        let bytes = w.into_bytes();

        let mut bs = BitCursor::from_slice(&bytes);
        let sh = SliceHeader::read(&mut bs, &sps, NalType::NonIdr).unwrap();
        assert_eq!(sh.slice_type, SliceType::P);
        assert_eq!(sh.num_ref_idx_active_minus1[0], Some(1));
        assert_eq!(sh.num_ref_idx_active_minus1[1], None);
        assert_eq!(sh.qp_u, 31);
        assert_eq!(sh.qp_v, 29);
    }
}
