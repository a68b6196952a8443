//! Parameter set parsing (SPS, PPS) and chroma QP mapping tables

use super::bitstream::{BitCursor, ByteSource};
use crate::error::EvcError;
use alloc::vec;
use alloc::vec::Vec;

type Result<T> = core::result::Result<T, EvcError>;

/// Highest picture parameter set id plus one
pub const MAX_NUM_PPS: u32 = 64;

/// Entries in a chroma QP mapping table (indices 0..=57)
pub const MAX_QP_TABLE_SIZE: usize = 58;

const EXTENDED_SAR: u32 = 255;

/// Signaled chroma QP table structure
#[derive(Debug, Clone, Default)]
pub struct ChromaQpTableParams {
    /// Table present flag; when false the default adjustment table applies
    pub present: bool,
    /// One table shared by both chroma components
    pub same_qp_table_for_chroma: bool,
    /// Pivot values start at 16 instead of the bit-depth offset
    pub global_offset_flag: bool,
    /// Number of signaled pivots minus 1, per component table
    pub num_points_in_qp_table_minus1: [u32; 2],
    /// Pivot input deltas minus 1
    pub delta_qp_in_val_minus1: [Vec<u32>; 2],
    /// Pivot output deltas
    pub delta_qp_out_val: [Vec<i32>; 2],
}

/// Sequence parameter set
#[derive(Debug, Clone)]
pub struct Sps {
    /// SPS id
    pub sps_seq_parameter_set_id: u32,
    /// Profile indicator
    pub profile_idc: u8,
    /// Level indicator
    pub level_idc: u8,
    /// Toolset indicator, high word
    pub toolset_idc_h: u32,
    /// Toolset indicator, low word
    pub toolset_idc_l: u32,
    /// Chroma format (0 = monochrome, 1 = 4:2:0, 2 = 4:2:2, 3 = 4:4:4)
    pub chroma_format_idc: u32,
    /// Picture width in luma samples
    pub pic_width_in_luma_samples: u32,
    /// Picture height in luma samples
    pub pic_height_in_luma_samples: u32,
    /// Luma bit depth minus 8
    pub bit_depth_luma_minus8: u32,
    /// Chroma bit depth minus 8
    pub bit_depth_chroma_minus8: u32,
    /// Log2 of the sub-GOP length
    pub log2_sub_gop_length: u32,
    /// Log2 of the reference picture gap (only when sub-GOP length is 1)
    pub log2_ref_pic_gap_length: u32,
    /// Maximum number of reference pictures
    pub max_num_ref_pics: u32,
    /// Picture cropping present
    pub picture_cropping_flag: bool,
    /// Crop offsets (left, right, top, bottom)
    pub picture_crop_offset: (u32, u32, u32, u32),
    /// Signaled chroma QP table
    pub chroma_qp_table: ChromaQpTableParams,
    /// VUI present flag
    pub vui_parameters_present_flag: bool,
    /// VUI parameters, when present
    pub vui_parameters: Option<Vui>,
}

impl Sps {
    /// Luma bit depth
    pub fn bit_depth_luma(&self) -> u32 {
        8 + self.bit_depth_luma_minus8
    }

    /// Chroma bit depth
    pub fn bit_depth_chroma(&self) -> u32 {
        8 + self.bit_depth_chroma_minus8
    }

    /// Horizontal chroma subsampling shift
    pub fn chroma_w_shift(&self) -> u32 {
        match self.chroma_format_idc {
            0 | 1 | 2 => 1,
            _ => 0,
        }
    }

    /// Vertical chroma subsampling shift
    pub fn chroma_h_shift(&self) -> u32 {
        match self.chroma_format_idc {
            0 | 1 => 1,
            _ => 0,
        }
    }

    /// Whether the stream carries chroma components
    pub fn has_chroma(&self) -> bool {
        self.chroma_format_idc != 0
    }

    /// Read an SPS from the cursor.
    ///
    /// The baseline profile fixes every optional coding tool off; a set
    /// tool flag is a malformed stream, not an unsupported one.
    pub fn read<S: ByteSource>(bs: &mut BitCursor<S>) -> Result<Self> {
        let sps_seq_parameter_set_id = bs.read_ue()?;
        let profile_idc = bs.read(8)? as u8;
        let level_idc = bs.read(8)? as u8;
        let toolset_idc_h = bs.read(32)?;
        let toolset_idc_l = bs.read(32)?;
        let chroma_format_idc = bs.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(EvcError::MalformedBitstream("chroma_format_idc out of range"));
        }
        let pic_width_in_luma_samples = bs.read_ue()?;
        let pic_height_in_luma_samples = bs.read_ue()?;
        if pic_width_in_luma_samples == 0 || pic_height_in_luma_samples == 0 {
            return Err(EvcError::MalformedBitstream("zero picture dimension"));
        }
        let bit_depth_luma_minus8 = bs.read_ue()?;
        let bit_depth_chroma_minus8 = bs.read_ue()?;

        // the thirteen tool flags from sps_btt_flag through sps_dra_flag,
        // all required zero in the baseline profile
        for _ in 0..13 {
            if bs.read1()? != 0 {
                return Err(EvcError::MalformedBitstream("baseline tool flag is set"));
            }
        }

        // sps_rpl_flag and sps_pocs_flag are zero in the baseline, so
        // the sub-GOP fields are always present
        let log2_sub_gop_length = bs.read_ue()?;
        let log2_ref_pic_gap_length = if log2_sub_gop_length == 0 {
            bs.read_ue()?
        } else {
            0
        };
        let max_num_ref_pics = bs.read_ue()?;

        let picture_cropping_flag = bs.read_flag()?;
        let picture_crop_offset = if picture_cropping_flag {
            (bs.read_ue()?, bs.read_ue()?, bs.read_ue()?, bs.read_ue()?)
        } else {
            (0, 0, 0, 0)
        };

        let mut chroma_qp_table = ChromaQpTableParams::default();
        if chroma_format_idc != 0 {
            chroma_qp_table.present = bs.read_flag()?;
            if chroma_qp_table.present {
                chroma_qp_table.same_qp_table_for_chroma = bs.read_flag()?;
                chroma_qp_table.global_offset_flag = bs.read_flag()?;
                let tables = if chroma_qp_table.same_qp_table_for_chroma {
                    1
                } else {
                    2
                };
                for i in 0..tables {
                    let num_points_minus1 = bs.read_ue()?;
                    if num_points_minus1 as usize >= MAX_QP_TABLE_SIZE {
                        return Err(EvcError::MalformedBitstream("too many chroma QP pivots"));
                    }
                    chroma_qp_table.num_points_in_qp_table_minus1[i] = num_points_minus1;
                    for _ in 0..=num_points_minus1 {
                        chroma_qp_table.delta_qp_in_val_minus1[i].push(bs.read(6)?);
                        chroma_qp_table.delta_qp_out_val[i].push(bs.read_se()?);
                    }
                }
            }
        }

        let vui_parameters_present_flag = bs.read_flag()?;
        let vui_parameters = if vui_parameters_present_flag {
            Some(Vui::read(bs)?)
        } else {
            None
        };

        bs.align_to_byte()?;

        Ok(Self {
            sps_seq_parameter_set_id,
            profile_idc,
            level_idc,
            toolset_idc_h,
            toolset_idc_l,
            chroma_format_idc,
            pic_width_in_luma_samples,
            pic_height_in_luma_samples,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            log2_sub_gop_length,
            log2_ref_pic_gap_length,
            max_num_ref_pics,
            picture_cropping_flag,
            picture_crop_offset,
            chroma_qp_table,
            vui_parameters_present_flag,
            vui_parameters,
        })
    }
}

/// Picture parameter set
#[derive(Debug, Clone)]
pub struct Pps {
    /// PPS id
    pub pps_pic_parameter_set_id: u32,
    /// Referenced SPS id
    pub pps_seq_parameter_set_id: u32,
    /// Default active reference counts minus 1 per list
    pub num_ref_idx_default_active_minus1: [u32; 2],
    /// Additional long-term POC LSB length
    pub additional_lt_poc_lsb_len: u32,
    /// List-1 reference picture list index present
    pub rpl1_idx_present_flag: bool,
    /// Tile id field length minus 1
    pub tile_id_len_minus1: u32,
    /// Explicit tile id present
    pub explicit_tile_id_flag: bool,
    /// Explicit tile id of the single tile, when signaled
    pub tile_id_val: u32,
    /// Constrained intra prediction
    pub constrained_intra_pred_flag: bool,
    /// Per-CU delta QP coding enabled
    pub cu_qp_delta_enabled_flag: bool,
    /// Delta QP area (signaled value plus 6)
    pub cu_qp_delta_area: u32,
}

impl Pps {
    /// Read a PPS from the cursor
    pub fn read<S: ByteSource>(bs: &mut BitCursor<S>) -> Result<Self> {
        let pps_pic_parameter_set_id = bs.read_ue()?;
        if pps_pic_parameter_set_id >= MAX_NUM_PPS {
            return Err(EvcError::MalformedBitstream("pps id out of range"));
        }
        let pps_seq_parameter_set_id = bs.read_ue()?;
        let num_ref_idx_default_active_minus1 = [bs.read_ue()?, bs.read_ue()?];
        let additional_lt_poc_lsb_len = bs.read_ue()?;
        let rpl1_idx_present_flag = bs.read_flag()?;

        let single_tile_in_pic_flag = bs.read_flag()?;
        if !single_tile_in_pic_flag {
            return Err(EvcError::MalformedBitstream("multiple tiles in baseline stream"));
        }

        // unused by the baseline decode, but part of the grammar
        let tile_id_len_minus1 = bs.read_ue()?;
        if tile_id_len_minus1 >= 32 {
            return Err(EvcError::MalformedBitstream("tile_id_len_minus1 out of range"));
        }
        let explicit_tile_id_flag = bs.read_flag()?;
        let tile_id_val = if explicit_tile_id_flag {
            bs.read(tile_id_len_minus1 + 1)?
        } else {
            0
        };

        if bs.read1()? != 0 {
            return Err(EvcError::MalformedBitstream("pic_dra_enabled_flag is set"));
        }
        if bs.read1()? != 0 {
            return Err(EvcError::MalformedBitstream("arbitrary_slice_present_flag is set"));
        }

        let constrained_intra_pred_flag = bs.read_flag()?;
        let cu_qp_delta_enabled_flag = bs.read_flag()?;
        let cu_qp_delta_area = if cu_qp_delta_enabled_flag {
            bs.read_ue()? + 6
        } else {
            0
        };

        bs.align_to_byte()?;

        Ok(Self {
            pps_pic_parameter_set_id,
            pps_seq_parameter_set_id,
            num_ref_idx_default_active_minus1,
            additional_lt_poc_lsb_len,
            rpl1_idx_present_flag,
            tile_id_len_minus1,
            explicit_tile_id_flag,
            tile_id_val,
            constrained_intra_pred_flag,
            cu_qp_delta_enabled_flag,
            cu_qp_delta_area,
        })
    }
}

/// Hypothetical reference decoder parameters
#[derive(Debug, Clone, Default)]
pub struct Hrd {
    /// Number of CPB specifications minus 1
    pub cpb_cnt_minus1: u32,
    /// Bit rate scale
    pub bit_rate_scale: u32,
    /// CPB size scale
    pub cpb_size_scale: u32,
    /// Per-schedule bit rate values minus 1
    pub bit_rate_value_minus1: Vec<u32>,
    /// Per-schedule CPB size values minus 1
    pub cpb_size_value_minus1: Vec<u32>,
    /// Per-schedule constant bit rate flags
    pub cbr_flag: Vec<bool>,
    /// Initial CPB removal delay field length minus 1
    pub initial_cpb_removal_delay_length_minus1: u32,
    /// CPB removal delay field length minus 1
    pub cpb_removal_delay_length_minus1: u32,
    /// DPB output delay field length minus 1
    pub dpb_output_delay_length_minus1: u32,
    /// Time offset field length
    pub time_offset_length: u32,
}

impl Hrd {
    fn read<S: ByteSource>(bs: &mut BitCursor<S>) -> Result<Self> {
        let mut hrd = Self {
            cpb_cnt_minus1: bs.read_ue()?,
            ..Self::default()
        };
        if hrd.cpb_cnt_minus1 >= 32 {
            return Err(EvcError::MalformedBitstream("cpb_cnt_minus1 out of range"));
        }
        hrd.bit_rate_scale = bs.read(4)?;
        hrd.cpb_size_scale = bs.read(4)?;
        for _ in 0..=hrd.cpb_cnt_minus1 {
            hrd.bit_rate_value_minus1.push(bs.read_ue()?);
            hrd.cpb_size_value_minus1.push(bs.read_ue()?);
            hrd.cbr_flag.push(bs.read_flag()?);
        }
        hrd.initial_cpb_removal_delay_length_minus1 = bs.read(5)?;
        hrd.cpb_removal_delay_length_minus1 = bs.read(5)?;
        hrd.dpb_output_delay_length_minus1 = bs.read(5)?;
        hrd.time_offset_length = bs.read(5)?;
        Ok(hrd)
    }
}

/// Video usability information
#[derive(Debug, Clone, Default)]
pub struct Vui {
    /// Aspect ratio info present
    pub aspect_ratio_info_present_flag: bool,
    /// Aspect ratio indicator
    pub aspect_ratio_idc: u32,
    /// Sample aspect ratio width (extended SAR)
    pub sar_width: u32,
    /// Sample aspect ratio height (extended SAR)
    pub sar_height: u32,
    /// Overscan info present
    pub overscan_info_present_flag: bool,
    /// Overscan appropriate
    pub overscan_appropriate_flag: bool,
    /// Video signal type present
    pub video_signal_type_present_flag: bool,
    /// Video format
    pub video_format: u32,
    /// Full range video
    pub video_full_range_flag: bool,
    /// Colour description present
    pub colour_description_present_flag: bool,
    /// Colour primaries
    pub colour_primaries: u32,
    /// Transfer characteristics
    pub transfer_characteristics: u32,
    /// Matrix coefficients
    pub matrix_coefficients: u32,
    /// Chroma sample location info present
    pub chroma_loc_info_present_flag: bool,
    /// Chroma sample location, top field
    pub chroma_sample_loc_type_top_field: u32,
    /// Chroma sample location, bottom field
    pub chroma_sample_loc_type_bottom_field: u32,
    /// Neutral chroma indication
    pub neutral_chroma_indication_flag: bool,
    /// Field sequence flag
    pub field_seq_flag: bool,
    /// Timing info present
    pub timing_info_present_flag: bool,
    /// Units per timing tick
    pub num_units_in_tick: u32,
    /// Time scale
    pub time_scale: u32,
    /// Fixed picture rate
    pub fixed_pic_rate_flag: bool,
    /// NAL HRD parameters present
    pub nal_hrd_parameters_present_flag: bool,
    /// VCL HRD parameters present
    pub vcl_hrd_parameters_present_flag: bool,
    /// HRD parameters, when either HRD flag is set
    pub hrd_parameters: Option<Hrd>,
    /// Low-delay HRD flag
    pub low_delay_hrd_flag: bool,
    /// Picture structure present
    pub pic_struct_present_flag: bool,
    /// Bitstream restriction info present
    pub bitstream_restriction_flag: bool,
    /// Motion vectors may cross picture boundaries
    pub motion_vectors_over_pic_boundaries_flag: bool,
    /// Maximum bytes per picture denominator
    pub max_bytes_per_pic_denom: u32,
    /// Maximum bits per macroblock denominator
    pub max_bits_per_mb_denom: u32,
    /// Log2 maximum horizontal motion vector length
    pub log2_max_mv_length_horizontal: u32,
    /// Log2 maximum vertical motion vector length
    pub log2_max_mv_length_vertical: u32,
    /// Number of reorder pictures
    pub num_reorder_pics: u32,
    /// Maximum decoded picture buffering
    pub max_dec_pic_buffering: u32,
}

impl Vui {
    fn read<S: ByteSource>(bs: &mut BitCursor<S>) -> Result<Self> {
        let mut vui = Self::default();

        vui.aspect_ratio_info_present_flag = bs.read_flag()?;
        if vui.aspect_ratio_info_present_flag {
            vui.aspect_ratio_idc = bs.read(8)?;
            if vui.aspect_ratio_idc == EXTENDED_SAR {
                vui.sar_width = bs.read(16)?;
                vui.sar_height = bs.read(16)?;
            }
        }
        vui.overscan_info_present_flag = bs.read_flag()?;
        if vui.overscan_info_present_flag {
            vui.overscan_appropriate_flag = bs.read_flag()?;
        }
        vui.video_signal_type_present_flag = bs.read_flag()?;
        if vui.video_signal_type_present_flag {
            vui.video_format = bs.read(3)?;
            vui.video_full_range_flag = bs.read_flag()?;
            vui.colour_description_present_flag = bs.read_flag()?;
            if vui.colour_description_present_flag {
                vui.colour_primaries = bs.read(8)?;
                vui.transfer_characteristics = bs.read(8)?;
                vui.matrix_coefficients = bs.read(8)?;
            }
        }
        vui.chroma_loc_info_present_flag = bs.read_flag()?;
        if vui.chroma_loc_info_present_flag {
            vui.chroma_sample_loc_type_top_field = bs.read_ue()?;
            vui.chroma_sample_loc_type_bottom_field = bs.read_ue()?;
        }
        vui.neutral_chroma_indication_flag = bs.read_flag()?;
        vui.field_seq_flag = bs.read_flag()?;
        vui.timing_info_present_flag = bs.read_flag()?;
        if vui.timing_info_present_flag {
            vui.num_units_in_tick = bs.read(32)?;
            vui.time_scale = bs.read(32)?;
            vui.fixed_pic_rate_flag = bs.read_flag()?;
        }
        vui.nal_hrd_parameters_present_flag = bs.read_flag()?;
        if vui.nal_hrd_parameters_present_flag {
            vui.hrd_parameters = Some(Hrd::read(bs)?);
        }
        vui.vcl_hrd_parameters_present_flag = bs.read_flag()?;
        if vui.vcl_hrd_parameters_present_flag {
            vui.hrd_parameters = Some(Hrd::read(bs)?);
        }
        if vui.nal_hrd_parameters_present_flag || vui.vcl_hrd_parameters_present_flag {
            vui.low_delay_hrd_flag = bs.read_flag()?;
        }
        vui.pic_struct_present_flag = bs.read_flag()?;
        vui.bitstream_restriction_flag = bs.read_flag()?;
        if vui.bitstream_restriction_flag {
            vui.motion_vectors_over_pic_boundaries_flag = bs.read_flag()?;
            vui.max_bytes_per_pic_denom = bs.read_ue()?;
            vui.max_bits_per_mb_denom = bs.read_ue()?;
            vui.log2_max_mv_length_horizontal = bs.read_ue()?;
            vui.log2_max_mv_length_vertical = bs.read_ue()?;
            vui.num_reorder_pics = bs.read_ue()?;
            vui.max_dec_pic_buffering = bs.read_ue()?;
        }

        Ok(vui)
    }
}

/// Default chroma QP adjustment table (indices 0..=57)
static QP_CHROMA_ADJUST: [i8; MAX_QP_TABLE_SIZE] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, //
    12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, //
    24, 25, 26, 27, 28, 29, 29, 30, 31, 32, 32, 33, //
    34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, //
    39, 39, 39, 39, 39, 39, 39, 39, 39, 39,
];

/// Chroma QP mapping tables for both components.
///
/// Maps a clipped chroma QP index in `[-6 * (bit_depth - 8), 57]` to the
/// chroma quantization parameter. Built once per sequence, from either
/// the default adjustment table or the pivots signaled in the SPS.
#[derive(Debug, Clone)]
pub struct ChromaQpTable {
    qp_bd_offset_c: i32,
    tbl: [Vec<i8>; 2],
}

impl ChromaQpTable {
    /// Build the mapping tables for a sequence
    pub fn from_sps(sps: &Sps) -> Self {
        let qp_bd_offset_c = 6 * sps.bit_depth_chroma_minus8 as i32;
        let len = MAX_QP_TABLE_SIZE + qp_bd_offset_c as usize;

        let mut tbl = [vec![0i8; len], vec![0i8; len]];

        if sps.chroma_qp_table.present {
            derive_tables(&sps.chroma_qp_table, qp_bd_offset_c, &mut tbl);
        } else {
            for t in tbl.iter_mut() {
                t[qp_bd_offset_c as usize..].copy_from_slice(&QP_CHROMA_ADJUST);
            }
        }

        Self { qp_bd_offset_c, tbl }
    }

    /// Look up the mapped chroma QP for component `comp` (0 = Cb, 1 = Cr)
    /// at the clipped index `qp_i`
    pub fn map(&self, comp: usize, qp_i: i32) -> i32 {
        let idx = (qp_i + self.qp_bd_offset_c).clamp(0, self.tbl[comp].len() as i32 - 1);
        i32::from(self.tbl[comp][idx as usize])
    }
}

/// Derive signaled tables by piecewise-linear interpolation between
/// pivots, extended by steps of 1 outside the pivot span.
fn derive_tables(params: &ChromaQpTableParams, qp_bd_offset_c: i32, tbl: &mut [Vec<i8>; 2]) {
    let max_qp = MAX_QP_TABLE_SIZE as i32 - 1;
    let start_qp = if params.global_offset_flag {
        16
    } else {
        -qp_bd_offset_c
    };
    let tables = if params.same_qp_table_for_chroma { 1 } else { 2 };

    for i in 0..tables {
        let points = params.num_points_in_qp_table_minus1[i] as usize + 1;
        let mut qp_in = vec![0i32; points];
        let mut qp_out = vec![0i32; points];

        qp_in[0] = start_qp + params.delta_qp_in_val_minus1[i][0] as i32;
        qp_out[0] = qp_in[0] + params.delta_qp_out_val[i][0];
        for j in 1..points {
            let din = params.delta_qp_in_val_minus1[i][j] as i32 + 1;
            qp_in[j] = qp_in[j - 1] + din;
            qp_out[j] = qp_out[j - 1] + din + params.delta_qp_out_val[i][j];
        }

        let at = |qp: i32| -> usize { (qp + qp_bd_offset_c) as usize };

        let t = &mut tbl[i];
        let first = qp_in[0].clamp(-qp_bd_offset_c, max_qp);
        t[at(first)] = qp_out[0].clamp(-qp_bd_offset_c, max_qp) as i8;
        for qp in (-qp_bd_offset_c..first).rev() {
            let next = i32::from(t[at(qp + 1)]);
            t[at(qp)] = (next - 1).clamp(-qp_bd_offset_c, max_qp) as i8;
        }
        for j in 0..points - 1 {
            let span = params.delta_qp_in_val_minus1[i][j + 1] as i32 + 1;
            let sh = span >> 1;
            let base = i32::from(t[at(qp_in[j].clamp(-qp_bd_offset_c, max_qp))]);
            let mut m = 1;
            for qp in qp_in[j] + 1..=qp_in[j + 1] {
                if qp < -qp_bd_offset_c || qp > max_qp {
                    m += 1;
                    continue;
                }
                let v = base + ((qp_out[j + 1] - qp_out[j]) * m + sh) / span;
                t[at(qp)] = v.clamp(-qp_bd_offset_c, max_qp) as i8;
                m += 1;
            }
        }
        let last = qp_in[points - 1].clamp(-qp_bd_offset_c, max_qp);
        for qp in last + 1..=max_qp {
            let prev = i32::from(t[at(qp - 1)]);
            t[at(qp)] = (prev + 1).clamp(-qp_bd_offset_c, max_qp) as i8;
        }
    }

    if params.same_qp_table_for_chroma {
        let (first, rest) = tbl.split_at_mut(1);
        rest[0].copy_from_slice(&first[0]);
    }
}
