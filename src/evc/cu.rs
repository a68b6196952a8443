//! Coding-tree and coding-unit syntax decoding
//!
//! One `SliceDecoder` drives the arithmetic decoder over one slice:
//! quad-tree recursion from each coding-tree unit down to coding units,
//! the per-unit prediction/motion/residual state machine, and the
//! publication of each decoded unit into the picture-wide neighbor maps.

use super::bitstream::{BitCursor, ByteSource};
use super::map::{CTU_SIZE, NeighborMaps};
use super::params::{ChromaQpTable, Pps, Sps};
use super::residual::{self, MAX_TR_LOG2, ScanTables};
use super::sbac::{Sbac, SbacContext};
use super::slice::{SliceHeader, SliceType};
use super::trace::SyntaxTracer;
use crate::error::{EvcError, check_stop};
use alloc::vec;
use alloc::vec::Vec;
use enough::Stop;

type Result<T> = core::result::Result<T, EvcError>;

/// Log2 of the minimum coding unit size
pub const MIN_CU_LOG2: u32 = 2;

/// Log2 of the coding-tree unit size
pub const MAX_CU_LOG2: u32 = 6;

/// Number of ranked intra prediction modes
pub const IPD_CNT: usize = 5;

/// Reference index marking an unused list
pub const REFI_INVALID: i8 = -1;

/// Prediction mode of a coding unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredMode {
    /// Intra prediction
    #[default]
    Intra,
    /// Inter prediction with coded motion
    Inter,
    /// Skip: motion from predictor only, no residual
    Skip,
    /// Direct: derived motion, coded residual
    Direct,
}

/// Inter prediction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterDir {
    /// List 0 only
    #[default]
    List0,
    /// List 1 only
    List1,
    /// Both lists
    Bi,
}

impl InterDir {
    /// Whether reference list `lst` participates
    pub fn uses_list(self, lst: usize) -> bool {
        (((self as u32) + 1) >> lst) & 1 != 0
    }
}

/// A motion vector or motion vector difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mv {
    /// Horizontal component
    pub x: i16,
    /// Vertical component
    pub y: i16,
}

/// Transient record of one decoded coding unit.
///
/// Owned by the slice decoder and reused across units; published into
/// the neighbor maps and handed to the caller's sink once complete.
#[derive(Debug, Clone)]
pub struct CuRecord {
    /// Pixel x position
    pub x: u32,
    /// Pixel y position
    pub y: u32,
    /// Log2 unit width
    pub log2_w: u32,
    /// Log2 unit height
    pub log2_h: u32,
    /// Prediction mode
    pub pred_mode: PredMode,
    /// Inter prediction direction
    pub inter_dir: InterDir,
    /// Reference index per list
    pub refi: [i8; 2],
    /// Motion vector predictor index per list
    pub mvp_idx: [u8; 2],
    /// Motion vector difference per list
    pub mvd: [Mv; 2],
    /// Intra prediction mode (chroma follows luma)
    pub ipm: u8,
    /// Quantization parameter
    pub qp: u8,
    /// Luma QP including the bit-depth offset
    pub qp_y: u8,
    /// Mapped Cb QP
    pub qp_u: u8,
    /// Mapped Cr QP
    pub qp_v: u8,
    /// Per-component nonzero-coefficient flags
    pub nnz: [bool; 3],
    /// Per-component, per-sub-block nonzero flags
    pub nnz_sub: [[bool; 4]; 3],
    /// Per-component coefficient buffers, raster layout at unit size
    pub coef: [Vec<i16>; 3],
    w_shift: u32,
    h_shift: u32,
}

impl CuRecord {
    /// Allocate a record able to hold the largest coding unit
    pub fn new(sps: &Sps) -> Self {
        let dim = 1usize << (MAX_CU_LOG2 * 2);
        let w_shift = sps.chroma_w_shift();
        let h_shift = sps.chroma_h_shift();
        let chroma_dim = dim >> (w_shift + h_shift);
        Self {
            x: 0,
            y: 0,
            log2_w: MIN_CU_LOG2,
            log2_h: MIN_CU_LOG2,
            pred_mode: PredMode::Intra,
            inter_dir: InterDir::List0,
            refi: [REFI_INVALID; 2],
            mvp_idx: [0; 2],
            mvd: [Mv::default(); 2],
            ipm: 0,
            qp: 0,
            qp_y: 0,
            qp_u: 0,
            qp_v: 0,
            nnz: [false; 3],
            nnz_sub: [[false; 4]; 3],
            coef: [vec![0; dim], vec![0; chroma_dim], vec![0; chroma_dim]],
            w_shift,
            h_shift,
        }
    }

    /// Reset the record for a new unit at the given position and size
    pub fn begin(&mut self, x: u32, y: u32, log2_w: u32, log2_h: u32) {
        self.x = x;
        self.y = y;
        self.log2_w = log2_w;
        self.log2_h = log2_h;
        self.pred_mode = PredMode::Intra;
        self.inter_dir = InterDir::List0;
        self.refi = [REFI_INVALID; 2];
        self.mvp_idx = [0; 2];
        self.mvd = [Mv::default(); 2];
        self.ipm = 0;
        self.nnz = [false; 3];
        self.nnz_sub = [[false; 4]; 3];

        let dim = 1usize << (log2_w + log2_h);
        let chroma_dim = dim >> (self.w_shift + self.h_shift);
        self.coef[0][..dim].fill(0);
        self.coef[1][..chroma_dim].fill(0);
        self.coef[2][..chroma_dim].fill(0);
    }

    /// Luma coefficient count of this unit
    pub fn luma_dim(&self) -> usize {
        1usize << (self.log2_w + self.log2_h)
    }

    /// Chroma coefficient count of this unit
    pub fn chroma_dim(&self) -> usize {
        self.luma_dim() >> (self.w_shift + self.h_shift)
    }
}

/// Ranked most-probable-mode candidate lists.
///
/// Supplied by the intra prediction module: for a `(left, above)`
/// neighbor-mode pair (offset by one, 0 meaning unavailable), returns
/// the rank of each of the five prediction modes. The returned array is
/// a permutation of `0..IPD_CNT`.
pub trait MpmTable {
    /// Candidate ranks for a neighbor-mode pair
    fn candidates(&self, ipm_left: u8, ipm_above: u8) -> [u8; IPD_CNT];
}

/// External inputs to a slice decode
pub struct Collaborators<'a> {
    /// Zig-zag scan tables
    pub scan: &'a ScanTables,
    /// Most-probable-mode candidate table
    pub mpm: &'a dyn MpmTable,
    /// Chroma QP mapping for the active sequence
    pub chroma_qp: &'a ChromaQpTable,
    /// Active reference picture count per list
    pub num_active_refs: [u8; 2],
}

/// Syntax decoder for one slice.
///
/// Owns the bit cursor and arithmetic decoder for the slice's coded
/// data and sequences every per-unit read. Strictly sequential: the
/// probability state after each bin depends on every prior bin.
pub struct SliceDecoder<'a, S: ByteSource> {
    sps: &'a Sps,
    pps: &'a Pps,
    sh: &'a SliceHeader,
    bs: BitCursor<S>,
    sbac: Sbac,
    ctx: SbacContext,
    collab: Collaborators<'a>,
    qp_prev: u8,
    cu: CuRecord,
    coef_sub: [Vec<i16>; 3],
    tracer: Option<&'a mut dyn SyntaxTracer>,
}

impl<'a, S: ByteSource> SliceDecoder<'a, S> {
    /// Create a decoder over slice data; the cursor must sit at the
    /// first byte after the slice header. Seeds the arithmetic decoder
    /// and resets all context models.
    pub fn new(
        sps: &'a Sps,
        pps: &'a Pps,
        sh: &'a SliceHeader,
        mut bs: BitCursor<S>,
        collab: Collaborators<'a>,
    ) -> Result<Self> {
        let sbac = Sbac::new(&mut bs)?;
        let sub_dim = residual::MAX_TR_DIM;
        let sub_chroma = sub_dim >> (sps.chroma_w_shift() + sps.chroma_h_shift());
        Ok(Self {
            sps,
            pps,
            sh,
            bs,
            sbac,
            ctx: SbacContext::new(),
            collab,
            qp_prev: sh.qp,
            cu: CuRecord::new(sps),
            coef_sub: [vec![0; sub_dim], vec![0; sub_chroma], vec![0; sub_chroma]],
            tracer: None,
        })
    }

    /// Install a syntax-element observer
    pub fn with_tracer(mut self, tracer: &'a mut dyn SyntaxTracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Bytes consumed from the slice data so far
    pub fn bytes_consumed(&self) -> usize {
        self.bs.bytes_consumed()
    }

    fn trace(&mut self, name: &'static str, value: i32) {
        if let Some(t) = self.tracer.as_deref_mut() {
            t.element(name, value);
        }
    }

    /// Decode every coding-tree unit of the slice.
    ///
    /// Each completed unit is published into `maps` and passed to
    /// `on_unit`. Cancellation is honored at CTU boundaries only. After
    /// the last CTU the termination bin must signal end of slice.
    pub fn decode_slice(
        &mut self,
        maps: &mut NeighborMaps,
        stop: Option<&dyn Stop>,
        mut on_unit: impl FnMut(&CuRecord),
    ) -> Result<()> {
        maps.clear_coded();
        self.qp_prev = self.sh.qp;

        let w_ctu = self.sps.pic_width_in_luma_samples.div_ceil(CTU_SIZE);
        let h_ctu = self.sps.pic_height_in_luma_samples.div_ceil(CTU_SIZE);

        for y_ctu in 0..h_ctu {
            for x_ctu in 0..w_ctu {
                if let Some(s) = stop {
                    check_stop(s)?;
                }
                let x = x_ctu * CTU_SIZE;
                let y = y_ctu * CTU_SIZE;
                maps.start_ctu(x, y);
                self.decode_tree(maps, x, y, MAX_CU_LOG2, MAX_CU_LOG2, &mut on_unit)?;
            }
        }

        if self.sbac.decode_bin_trm(&mut self.bs)? != 1 {
            return Err(EvcError::MalformedBitstream("missing slice termination"));
        }
        Ok(())
    }

    /// Quad-tree recursion over one coding-tree block
    fn decode_tree(
        &mut self,
        maps: &mut NeighborMaps,
        x0: u32,
        y0: u32,
        log2_cuw: u32,
        log2_cuh: u32,
        on_unit: &mut impl FnMut(&CuRecord),
    ) -> Result<()> {
        let cuw = 1u32 << log2_cuw;
        let cuh = 1u32 << log2_cuh;
        let pic_w = self.sps.pic_width_in_luma_samples;
        let pic_h = self.sps.pic_height_in_luma_samples;

        let split = if cuw > (1 << MIN_CU_LOG2) || cuh > (1 << MIN_CU_LOG2) {
            let bin = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.split_cu_flag[0])?;
            self.trace("split_cu_flag", bin as i32);
            bin != 0
        } else {
            false
        };

        if split {
            let half = cuw >> 1;
            let parts = [
                (x0, y0),
                (x0 + half, y0),
                (x0, y0 + half),
                (x0 + half, y0 + half),
            ];
            for (x, y) in parts {
                if x < pic_w && y < pic_h {
                    self.decode_tree(maps, x, y, log2_cuw - 1, log2_cuh - 1, on_unit)?;
                }
            }
        } else {
            if x0 + cuw > pic_w || y0 + cuh > pic_h {
                return Err(EvcError::MalformedBitstream("unsplit unit crosses picture edge"));
            }
            self.decode_unit(maps, x0, y0, log2_cuw, log2_cuh, on_unit)?;
        }

        Ok(())
    }

    /// Decode one coding unit and publish it
    fn decode_unit(
        &mut self,
        maps: &mut NeighborMaps,
        x: u32,
        y: u32,
        log2_cuw: u32,
        log2_cuh: u32,
        on_unit: &mut impl FnMut(&CuRecord),
    ) -> Result<()> {
        self.cu.begin(x, y, log2_cuw, log2_cuh);

        if self.sh.slice_type.is_inter() {
            let skip = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.skip_flag[0])?;
            self.trace("skip_flag", skip as i32);
            if skip != 0 {
                self.cu.pred_mode = PredMode::Skip;
            }
        }

        if self.cu.pred_mode == PredMode::Skip {
            self.cu.mvp_idx[0] = self.decode_mvp_idx()?;
            if self.sh.slice_type == SliceType::B {
                self.cu.mvp_idx[1] = self.decode_mvp_idx()?;
            }

            self.cu.qp = if self.pps.cu_qp_delta_enabled_flag {
                self.qp_prev
            } else {
                self.sh.qp
            };
            self.set_unit_qp();
        } else {
            if self.sh.slice_type.is_inter() {
                let bin = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.pred_mode[0])?;
                self.trace("pred_mode", bin as i32);
                self.cu.pred_mode = if bin != 0 {
                    PredMode::Intra
                } else {
                    PredMode::Inter
                };
            }

            if self.cu.pred_mode == PredMode::Inter {
                if self.sh.slice_type == SliceType::B {
                    let bin =
                        self.sbac.decode_bin(&mut self.bs, &mut self.ctx.direct_mode_flag[0])?;
                    self.trace("direct_mode_flag", bin as i32);
                    if bin != 0 {
                        self.cu.pred_mode = PredMode::Direct;
                    }
                }

                if self.cu.pred_mode != PredMode::Direct {
                    if self.sh.slice_type == SliceType::B {
                        self.cu.inter_dir = self.decode_inter_pred_idc()?;
                    }

                    for lst in 0..2 {
                        if self.cu.inter_dir.uses_list(lst) {
                            self.cu.refi[lst] =
                                self.decode_refi(self.collab.num_active_refs[lst])? as i8;
                            self.cu.mvp_idx[lst] = self.decode_mvp_idx()?;
                            self.cu.mvd[lst] = self.decode_mvd()?;
                        }
                    }
                }
            } else {
                let (ipm_l, ipm_u) =
                    maps.intra_mode_neighbors(x >> MIN_CU_LOG2, y >> MIN_CU_LOG2);
                let list = self.collab.mpm.candidates(ipm_l, ipm_u);
                let rank = self.sbac.read_unary_sym(&mut self.bs, &mut self.ctx.intra_dir)?;
                let ipm = list
                    .iter()
                    .position(|&m| u32::from(m) == rank)
                    .ok_or(EvcError::MalformedBitstream("intra mode rank out of range"))?;
                self.cu.ipm = ipm as u8;
                self.trace("ipm", ipm as i32);
            }

            self.decode_coef()?;
        }

        maps.publish_unit(&self.cu);
        on_unit(&self.cu);

        Ok(())
    }

    /// Inter prediction direction for B slices
    fn decode_inter_pred_idc(&mut self) -> Result<InterDir> {
        let tmp = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.inter_dir[0])?;
        let dir = if tmp == 0 {
            InterDir::Bi
        } else {
            let tmp = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.inter_dir[1])?;
            if tmp != 0 { InterDir::List1 } else { InterDir::List0 }
        };
        self.trace("inter_dir", dir as i32);
        Ok(dir)
    }

    /// Reference index: two context bins, then an equiprobable tail
    /// bounded by the active reference count
    fn decode_refi(&mut self, num_refp: u8) -> Result<u8> {
        let num_refp = u32::from(num_refp);
        let mut ref_num = 0u32;

        if num_refp > 1 {
            if self.sbac.decode_bin(&mut self.bs, &mut self.ctx.refi[0])? != 0 {
                ref_num += 1;
                if num_refp > 2
                    && self.sbac.decode_bin(&mut self.bs, &mut self.ctx.refi[1])? != 0
                {
                    ref_num += 1;
                    while ref_num < num_refp - 1 {
                        if self.sbac.decode_bin_ep(&mut self.bs)? == 0 {
                            break;
                        }
                        ref_num += 1;
                    }
                }
            }
        }

        self.trace("refi", ref_num as i32);
        Ok(ref_num as u8)
    }

    /// Motion vector predictor index: truncated unary, bounded at four
    fn decode_mvp_idx(&mut self) -> Result<u8> {
        let idx = self
            .sbac
            .read_truncate_unary_sym(&mut self.bs, &mut self.ctx.mvp_idx, 4)?;
        self.trace("mvp_idx", idx as i32);
        Ok(idx as u8)
    }

    /// Magnitude of one motion vector difference component.
    ///
    /// A first bin of 1 means zero. Otherwise the magnitude class is a
    /// run of zero bins (the first against the context model, the rest
    /// equiprobable) terminated by a 1, followed by that many
    /// equiprobable suffix bits, MSB first.
    fn decode_abs_mvd(&mut self) -> Result<u32> {
        let code = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.mvd[0])?;
        if code != 0 {
            return Ok(0);
        }

        let mut len = 0u32;
        loop {
            let code = if len == 0 {
                self.sbac.decode_bin(&mut self.bs, &mut self.ctx.mvd[0])?
            } else {
                self.sbac.decode_bin_ep(&mut self.bs)?
            };
            len += 1;
            if code & 1 != 0 {
                break;
            }
        }
        if len > 15 {
            return Err(EvcError::MalformedBitstream("mvd out of range"));
        }

        let mut val = (1u32 << len) - 1;
        let mut rem = len;
        while rem != 0 {
            let code = self.sbac.decode_bin_ep(&mut self.bs)?;
            rem -= 1;
            val += code << rem;
        }

        if val > i16::MAX as u32 {
            return Err(EvcError::MalformedBitstream("mvd out of range"));
        }
        Ok(val)
    }

    /// Motion vector difference: magnitude plus sign per axis
    fn decode_mvd(&mut self) -> Result<Mv> {
        let mut mvd = Mv::default();

        let t = self.decode_abs_mvd()? as i16;
        if t != 0 {
            let sign = self.sbac.decode_bin_ep(&mut self.bs)?;
            mvd.x = if sign != 0 { -t } else { t };
        }

        let t = self.decode_abs_mvd()? as i16;
        if t != 0 {
            let sign = self.sbac.decode_bin_ep(&mut self.bs)?;
            mvd.y = if sign != 0 { -t } else { t };
        }

        self.trace("mvd_x", i32::from(mvd.x));
        self.trace("mvd_y", i32::from(mvd.y));
        Ok(mvd)
    }

    /// Delta QP: unary magnitude plus equiprobable sign
    fn decode_dqp(&mut self) -> Result<i32> {
        let abs = self.sbac.read_unary_sym(&mut self.bs, &mut self.ctx.delta_qp)?;
        if abs > 51 {
            return Err(EvcError::MalformedBitstream("delta qp out of range"));
        }

        let mut dqp = abs as i32;
        if dqp > 0 && self.sbac.decode_bin_ep(&mut self.bs)? != 0 {
            dqp = -dqp;
        }

        self.trace("dqp", dqp);
        Ok(dqp)
    }

    /// Derive the unit's luma and chroma QPs from `cu.qp`
    fn set_unit_qp(&mut self) {
        let qp = i32::from(self.cu.qp);
        let bd_luma = self.sps.bit_depth_luma_minus8 as i32;
        let bd_chroma = self.sps.bit_depth_chroma_minus8 as i32;
        let min = -6 * bd_chroma;

        self.cu.qp_y = (qp + 6 * bd_luma) as u8;
        let qp_i_cb = (qp + self.sh.qp_u_offset).clamp(min, 57);
        let qp_i_cr = (qp + self.sh.qp_v_offset).clamp(min, 57);
        self.cu.qp_u = (self.collab.chroma_qp.map(0, qp_i_cb) + 6 * bd_chroma) as u8;
        self.cu.qp_v = (self.collab.chroma_qp.map(1, qp_i_cr) + 6 * bd_chroma) as u8;
    }

    /// Coded-block-flag cascade for one (sub-)block
    fn decode_cbf(
        &mut self,
        is_intra: bool,
        is_sub: bool,
        first_sub: bool,
        cbf_all: &mut bool,
    ) -> Result<[bool; 3]> {
        let has_chroma = self.sps.has_chroma();
        let mut cbf = [false; 3];

        if !is_intra {
            if first_sub {
                let bin = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_all[0])?;
                self.trace("all_cbf", bin as i32);
                if bin == 0 {
                    *cbf_all = false;
                    return Ok(cbf);
                }
            }

            if has_chroma {
                cbf[1] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_cb[0])? != 0;
                self.trace("cbf_cb", cbf[1] as i32);
                cbf[2] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_cr[0])? != 0;
                self.trace("cbf_cr", cbf[2] as i32);
            }

            if !cbf[1] && !cbf[2] && !is_sub {
                // no signal left: luma must carry the residual
                cbf[0] = true;
            } else {
                cbf[0] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_luma[0])? != 0;
                self.trace("cbf_luma", cbf[0] as i32);
            }
        } else {
            if has_chroma {
                cbf[1] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_cb[0])? != 0;
                self.trace("cbf_cb", cbf[1] as i32);
                cbf[2] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_cr[0])? != 0;
                self.trace("cbf_cr", cbf[2] as i32);
            }
            cbf[0] = self.sbac.decode_bin(&mut self.bs, &mut self.ctx.cbf_luma[0])? != 0;
            self.trace("cbf_luma", cbf[0] as i32);
        }

        Ok(cbf)
    }

    /// Residual decode for the current unit: cbf cascade, delta QP, and
    /// per-component run-length coefficients, split into sub-blocks
    /// when a dimension exceeds the maximum transform size.
    fn decode_coef(&mut self) -> Result<()> {
        let w_shift = self.sps.chroma_w_shift();
        let h_shift = self.sps.chroma_h_shift();
        let log2_cuw = self.cu.log2_w;
        let log2_cuh = self.cu.log2_h;
        let log2_w_sub = log2_cuw.min(MAX_TR_LOG2);
        let log2_h_sub = log2_cuh.min(MAX_TR_LOG2);
        let loop_w = if log2_cuw > MAX_TR_LOG2 {
            1u32 << (log2_cuw - MAX_TR_LOG2)
        } else {
            1
        };
        let loop_h = if log2_cuh > MAX_TR_LOG2 {
            1u32 << (log2_cuh - MAX_TR_LOG2)
        } else {
            1
        };
        let stride = 1usize << log2_cuw;
        let sub_stride = 1usize << log2_w_sub;
        let is_sub = loop_w + loop_h > 2;
        let is_intra = self.cu.pred_mode == PredMode::Intra;

        let mut cbf_all = true;
        let mut tmp_coef = [0u32; 3];

        for j in 0..loop_h {
            for i in 0..loop_w {
                let cbf = if cbf_all {
                    self.decode_cbf(is_intra, is_sub, j == 0 && i == 0, &mut cbf_all)?
                } else {
                    [false; 3]
                };

                if self.pps.cu_qp_delta_enabled_flag && (cbf[0] || cbf[1] || cbf[2]) {
                    let dqp = self.decode_dqp()?;
                    self.cu.qp =
                        (i32::from(self.qp_prev) + dqp + 52).rem_euclid(52) as u8;
                    self.qp_prev = self.cu.qp;
                } else {
                    self.cu.qp = self.qp_prev;
                }
                self.set_unit_qp();

                let sub_idx = ((j << 1) | i) as usize;
                for c in 0..3usize {
                    if !cbf[c] {
                        self.cu.nnz_sub[c][sub_idx] = false;
                        continue;
                    }

                    let (log2_w_c, log2_h_c, stride_c, sub_stride_c) = if c == 0 {
                        (log2_w_sub, log2_h_sub, stride, sub_stride)
                    } else {
                        (
                            log2_w_sub - w_shift,
                            log2_h_sub - h_shift,
                            stride >> w_shift,
                            sub_stride >> w_shift,
                        )
                    };
                    let pos = if c == 0 {
                        (i as usize) * (1usize << log2_w_sub)
                            + (j as usize) * (1usize << log2_h_sub) * stride
                    } else {
                        (i as usize) * (1usize << (log2_w_sub - w_shift))
                            + (j as usize) * (1usize << (log2_h_sub - h_shift)) * (stride >> w_shift)
                    };

                    let scan = self.collab.scan.zigzag(log2_w_c, log2_h_c);
                    if is_sub {
                        residual::block_copy(
                            &self.cu.coef[c][pos..],
                            stride_c,
                            &mut self.coef_sub[c],
                            sub_stride_c,
                            log2_w_c,
                            log2_h_c,
                        );
                        residual::decode_run_length(
                            &mut self.bs,
                            &mut self.sbac,
                            &mut self.ctx,
                            scan,
                            &mut self.coef_sub[c],
                            c == 0,
                        )?;
                        residual::block_copy(
                            &self.coef_sub[c],
                            sub_stride_c,
                            &mut self.cu.coef[c][pos..],
                            stride_c,
                            log2_w_c,
                            log2_h_c,
                        );
                    } else {
                        let dim = 1usize << (log2_w_c + log2_h_c);
                        residual::decode_run_length(
                            &mut self.bs,
                            &mut self.sbac,
                            &mut self.ctx,
                            scan,
                            &mut self.cu.coef[c][..dim],
                            c == 0,
                        )?;
                    }

                    if let Some(t) = self.tracer.as_deref_mut() {
                        let dim = 1usize << (log2_w_c + log2_h_c);
                        if is_sub {
                            t.coefficients(c, &self.coef_sub[c][..dim]);
                        } else {
                            t.coefficients(c, &self.cu.coef[c][..dim]);
                        }
                    }

                    self.cu.nnz_sub[c][sub_idx] = true;
                    tmp_coef[c] += 1;
                }
            }
        }

        for c in 0..3 {
            self.cu.nnz[c] = tmp_coef[c] > 0;
        }

        Ok(())
    }
}
