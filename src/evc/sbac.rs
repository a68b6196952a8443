//! SBAC binary arithmetic decoder
//!
//! Context-adaptive binary arithmetic decoding for the EVC baseline
//! profile. The decoder keeps `range` in `[8192, 16384)` between
//! operations and pulls single raw bits from the bit cursor during
//! renormalization. All adaptation arithmetic must stay numerically
//! identical to the reference; any deviation desynchronizes every
//! subsequent bin.

use super::bitstream::{BitCursor, ByteSource};
use crate::error::EvcError;

type Result<T> = core::result::Result<T, EvcError>;

/// Number of raw bits read to seed the value register at slice start
pub const INIT_VALUE_BITS: u32 = 14;

/// One adaptive binary probability model.
///
/// `state` indexes the adaptation formulas and `mps` is the currently
/// favored bit. The reference packs both into one word
/// (`state << 1 | mps`); explicit fields are kept here since nothing
/// depends on the packed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextModel {
    /// Probability state, `1..=511`
    pub state: u16,
    /// Most probable symbol
    pub mps: u16,
}

/// Initial model: probability 1/2 with mps = 0
const PROB_INIT: ContextModel = ContextModel { state: 256, mps: 0 };

impl ContextModel {
    /// Create a model at the standard initial probability
    pub fn new() -> Self {
        PROB_INIT
    }
}

impl Default for ContextModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Context models grouped by syntax-element category.
///
/// Field names and counts follow the reference model table; `run`,
/// `last` and `level` hold the luma models first and the chroma models
/// after them.
#[derive(Debug, Clone)]
pub struct SbacContext {
    /// CU skip flag
    pub skip_flag: [ContextModel; 1],
    /// Direct mode flag (B slices)
    pub direct_mode_flag: [ContextModel; 1],
    /// Inter prediction direction
    pub inter_dir: [ContextModel; 2],
    /// Intra prediction mode rank
    pub intra_dir: [ContextModel; 2],
    /// Intra/inter prediction mode flag
    pub pred_mode: [ContextModel; 1],
    /// Reference picture index
    pub refi: [ContextModel; 2],
    /// Motion vector predictor index
    pub mvp_idx: [ContextModel; 3],
    /// Motion vector difference magnitude
    pub mvd: [ContextModel; 1],
    /// All-components coded flag
    pub cbf_all: [ContextModel; 1],
    /// Luma coded block flag
    pub cbf_luma: [ContextModel; 1],
    /// Cb coded block flag
    pub cbf_cb: [ContextModel; 1],
    /// Cr coded block flag
    pub cbf_cr: [ContextModel; 1],
    /// Coefficient zero-run length
    pub run: [ContextModel; 4],
    /// Last coefficient flag
    pub last: [ContextModel; 2],
    /// Coefficient level
    pub level: [ContextModel; 4],
    /// Quad-tree split flag
    pub split_cu_flag: [ContextModel; 1],
    /// Delta quantization parameter magnitude
    pub delta_qp: [ContextModel; 1],
}

impl SbacContext {
    /// Create a context table with every model at the initial probability
    pub fn new() -> Self {
        Self {
            skip_flag: [PROB_INIT; 1],
            direct_mode_flag: [PROB_INIT; 1],
            inter_dir: [PROB_INIT; 2],
            intra_dir: [PROB_INIT; 2],
            pred_mode: [PROB_INIT; 1],
            refi: [PROB_INIT; 2],
            mvp_idx: [PROB_INIT; 3],
            mvd: [PROB_INIT; 1],
            cbf_all: [PROB_INIT; 1],
            cbf_luma: [PROB_INIT; 1],
            cbf_cb: [PROB_INIT; 1],
            cbf_cr: [PROB_INIT; 1],
            run: [PROB_INIT; 4],
            last: [PROB_INIT; 2],
            level: [PROB_INIT; 4],
            split_cu_flag: [PROB_INIT; 1],
            delta_qp: [PROB_INIT; 1],
        }
    }

    /// Reset every model to the initial probability
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SbacContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Arithmetic decoder registers.
///
/// The context model table lives outside this struct (see
/// [`SbacContext`]) so a model can be borrowed mutably while the
/// registers advance.
#[derive(Debug, Clone)]
pub struct Sbac {
    range: u32,
    value: u32,
}

impl Sbac {
    /// Initialize the decoder at the start of arithmetic-coded data,
    /// seeding the value register with [`INIT_VALUE_BITS`] raw bits.
    pub fn new<S: ByteSource>(bs: &mut BitCursor<S>) -> Result<Self> {
        let mut value = 0u32;
        for _ in 0..INIT_VALUE_BITS {
            value = ((value << 1) | bs.read1()?) & 0xFFFF;
        }
        Ok(Self {
            range: 16384,
            value,
        })
    }

    /// Current `(range, value)` registers, for diagnostics
    pub fn registers(&self) -> (u32, u32) {
        (self.range, self.value)
    }

    /// Decode one context-modeled bin
    pub fn decode_bin<S: ByteSource>(
        &mut self,
        bs: &mut BitCursor<S>,
        model: &mut ContextModel,
    ) -> Result<u32> {
        let state = u32::from(model.state);
        let mps = u32::from(model.mps);

        let mut lps = (state * self.range) >> 9;
        if lps < 437 {
            lps = 437;
        }

        self.range -= lps;

        let bin;
        if self.value >= self.range {
            bin = 1 - mps;
            self.value -= self.range;
            self.range = lps;

            let mut state = state + ((512 - state + 16) >> 5);
            let mut mps = mps;
            if state > 256 {
                mps = 1 - mps;
                state = 512 - state;
            }
            model.state = state as u16;
            model.mps = mps as u16;
        } else {
            bin = mps;
            model.state = (state - ((state + 16) >> 5)) as u16;
        }

        while self.range < 8192 {
            self.range <<= 1;
            let t0 = bs.read1()?;
            self.value = ((self.value << 1) | t0) & 0xFFFF;
        }

        Ok(bin)
    }

    /// Decode one equiprobable (bypass) bin
    pub fn decode_bin_ep<S: ByteSource>(&mut self, bs: &mut BitCursor<S>) -> Result<u32> {
        self.range >>= 1;

        let bin;
        if self.value >= self.range {
            bin = 1;
            self.value -= self.range;
        } else {
            bin = 0;
        }

        // bypass bins are already normalized: exactly one raw bit
        self.range <<= 1;
        let t0 = bs.read1()?;
        self.value = ((self.value << 1) | t0) & 0xFFFF;

        Ok(bin)
    }

    /// Decode the termination bin.
    ///
    /// On 1, the remaining bits up to the byte boundary are padding and
    /// must all be zero.
    pub fn decode_bin_trm<S: ByteSource>(&mut self, bs: &mut BitCursor<S>) -> Result<u32> {
        self.range -= 1;

        if self.value >= self.range {
            while !bs.is_byte_aligned() {
                let t0 = bs.read1()?;
                if t0 != 0 {
                    return Err(EvcError::MalformedBitstream("nonzero padding after terminate"));
                }
            }
            Ok(1)
        } else {
            while self.range < 8192 {
                self.range <<= 1;
                let t0 = bs.read1()?;
                self.value = ((self.value << 1) | t0) & 0xFFFF;
            }
            Ok(0)
        }
    }

    /// Decode an unbounded unary symbol against a model array.
    ///
    /// The first bin uses `models[0]`; continuation bins walk the array
    /// and saturate at its last entry.
    pub fn read_unary_sym<S: ByteSource>(
        &mut self,
        bs: &mut BitCursor<S>,
        models: &mut [ContextModel],
    ) -> Result<u32> {
        let num_ctx = models.len();
        let mut ctx_idx = 0;

        let symbol = self.decode_bin(bs, &mut models[0])?;
        if symbol == 0 {
            return Ok(0);
        }

        let mut symbol = 0u32;
        loop {
            if ctx_idx < num_ctx - 1 {
                ctx_idx += 1;
            }
            let t32u = self.decode_bin(bs, &mut models[ctx_idx])?;
            symbol += 1;
            if t32u == 0 {
                break;
            }
        }

        Ok(symbol)
    }

    /// Decode a truncated unary symbol with at most `max_num - 1` bins
    pub fn read_truncate_unary_sym<S: ByteSource>(
        &mut self,
        bs: &mut BitCursor<S>,
        models: &mut [ContextModel],
        max_num: u32,
    ) -> Result<u32> {
        let num_ctx = models.len() as u32;
        let mut ctx_idx = 0u32;

        if max_num > 1 {
            while ctx_idx < max_num - 1 {
                let idx = ctx_idx.min(num_ctx - 1) as usize;
                let symbol = self.decode_bin(bs, &mut models[idx])?;
                if symbol == 0 {
                    break;
                }
                ctx_idx += 1;
            }
        }

        Ok(ctx_idx)
    }

    /// Decode an equiprobable unary symbol, reading at most `max_val` bins
    pub fn read_unary_sym_ep<S: ByteSource>(
        &mut self,
        bs: &mut BitCursor<S>,
        max_val: u32,
    ) -> Result<u32> {
        let mut counter = 0u32;

        let symbol = self.decode_bin_ep(bs)?;
        counter += 1;

        if symbol == 0 {
            return Ok(0);
        }

        let mut symbol = 0u32;
        loop {
            let t32u = if counter == max_val {
                0
            } else {
                self.decode_bin_ep(bs)?
            };
            counter += 1;
            symbol += 1;
            if t32u == 0 {
                break;
            }
        }

        Ok(symbol)
    }

    /// Decode `num_bin` equiprobable bins, MSB first
    pub fn decode_bins_ep<S: ByteSource>(
        &mut self,
        bs: &mut BitCursor<S>,
        num_bin: u32,
    ) -> Result<u32> {
        let mut value = 0u32;
        for bin in (0..num_bin).rev() {
            if self.decode_bin_ep(bs)? != 0 {
                value += 1 << bin;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evc::bitstream::BitCursor;
    use crate::evc::testenc::SbacEncoder;

    /// Reference adaptation step, straight from the formulas
    fn adapt(model: ContextModel, is_lps: bool) -> ContextModel {
        let state = u32::from(model.state);
        let mps = u32::from(model.mps);
        if is_lps {
            let mut state = state + ((512 - state + 16) >> 5);
            let mut mps = mps;
            if state > 256 {
                mps = 1 - mps;
                state = 512 - state;
            }
            ContextModel {
                state: state as u16,
                mps: mps as u16,
            }
        } else {
            ContextModel {
                state: (state - ((state + 16) >> 5)) as u16,
                mps: mps as u16,
            }
        }
    }

    #[test]
    fn test_decode_bin_golden() {
        // one MPS decode from the initial state against a fixed input.
        // With range = 16384 and value seeded from 14 zero bits, the
        // first bin from a fresh model must be the MPS (0) and the
        // state must step down by (256 + 16) >> 5 = 8.
        let data = [0u8; 8];
        let mut bs = BitCursor::from_slice(&data);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut model = ContextModel::new();

        let bin = sbac.decode_bin(&mut bs, &mut model).unwrap();
        assert_eq!(bin, 0);
        assert_eq!(model, ContextModel { state: 248, mps: 0 });
        let (range, value) = sbac.registers();
        assert!(range >= 8192 && range < 16384);
        assert!(value < 16384);

        // all-ones input: value starts at 0x3FFF, above the reduced
        // range, so the first bin must be the LPS (1) with the state
        // folding across the MPS flip boundary: 256 + (272 >> 5) = 264,
        // folded to 512 - 264 = 248 with mps flipped.
        let data = [0xFFu8; 8];
        let mut bs = BitCursor::from_slice(&data);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut model = ContextModel::new();

        let bin = sbac.decode_bin(&mut bs, &mut model).unwrap();
        assert_eq!(bin, 1);
        assert_eq!(model, ContextModel { state: 248, mps: 1 });
    }

    #[test]
    fn test_adaptation_formula_fixpoints() {
        // the LPS step from any state stays in 1..=256 after folding
        let mut m = ContextModel::new();
        for _ in 0..1000 {
            m = adapt(m, true);
            assert!(m.state >= 1 && m.state <= 256, "state {} escaped", m.state);
        }
        // the MPS step never underflows
        let mut m = ContextModel::new();
        for _ in 0..1000 {
            m = adapt(m, false);
            assert!(m.state >= 1, "state {} underflowed", m.state);
        }
    }

    #[test]
    fn test_context_bin_round_trip() {
        // a mixed bin pattern through one adapting model
        let bins: alloc::vec::Vec<u32> =
            (0..4000u32).map(|i| (i * i / 7 + i / 3) & 1).collect();

        let mut enc = SbacEncoder::new();
        let mut model = ContextModel::new();
        for &b in &bins {
            enc.encode_bin(b, &mut model);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut model = ContextModel::new();
        for (i, &b) in bins.iter().enumerate() {
            assert_eq!(sbac.decode_bin(&mut bs, &mut model).unwrap(), b, "bin {i}");
        }
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }

    #[test]
    fn test_decoder_tracks_encoder_state() {
        // the decoder's model after each bin must equal the encoder's
        let bins: alloc::vec::Vec<u32> = (0..512u32).map(|i| (i / 5) & 1).collect();

        let mut enc = SbacEncoder::new();
        let mut emodel = ContextModel::new();
        let mut states = alloc::vec::Vec::new();
        for &b in &bins {
            enc.encode_bin(b, &mut emodel);
            states.push(emodel);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut dmodel = ContextModel::new();
        for (i, &b) in bins.iter().enumerate() {
            assert_eq!(sbac.decode_bin(&mut bs, &mut dmodel).unwrap(), b);
            assert_eq!(dmodel, states[i], "model diverged at bin {i}");
        }
    }

    #[test]
    fn test_bypass_round_trip() {
        let bins: alloc::vec::Vec<u32> = (0..2000u32).map(|i| (i ^ (i >> 3)) & 1).collect();

        let mut enc = SbacEncoder::new();
        for &b in &bins {
            enc.encode_bin_ep(b);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        for (i, &b) in bins.iter().enumerate() {
            assert_eq!(sbac.decode_bin_ep(&mut bs).unwrap(), b, "bin {i}");
        }
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }

    #[test]
    fn test_unary_round_trip() {
        let symbols = [0u32, 1, 2, 3, 5, 9, 0, 17, 1, 0, 4];

        let mut enc = SbacEncoder::new();
        let mut models = [ContextModel::new(); 2];
        for &s in &symbols {
            enc.write_unary_sym(s, &mut models);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut models = [ContextModel::new(); 2];
        for &s in &symbols {
            assert_eq!(sbac.read_unary_sym(&mut bs, &mut models).unwrap(), s);
        }
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }

    #[test]
    fn test_truncate_unary_round_trip() {
        let symbols = [0u32, 3, 1, 2, 0, 3, 3, 1];

        let mut enc = SbacEncoder::new();
        let mut models = [ContextModel::new(); 3];
        for &s in &symbols {
            enc.write_truncate_unary_sym(s, &mut models, 4);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut models = [ContextModel::new(); 3];
        for &s in &symbols {
            assert_eq!(
                sbac.read_truncate_unary_sym(&mut bs, &mut models, 4).unwrap(),
                s
            );
        }
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }

    #[test]
    fn test_fixed_length_bypass_round_trip() {
        let values = [0u32, 1, 7, 12, 31, 16, 5];

        let mut enc = SbacEncoder::new();
        for &v in &values {
            enc.encode_bins_ep(v, 5);
        }
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        for &v in &values {
            assert_eq!(sbac.decode_bins_ep(&mut bs, 5).unwrap(), v);
        }
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }

    #[test]
    fn test_terminate_zero_then_one() {
        let mut enc = SbacEncoder::new();
        let mut model = ContextModel::new();
        enc.encode_bin(1, &mut model);
        enc.encode_bin_trm(0);
        enc.encode_bin(0, &mut model);
        enc.encode_bin_trm(1);
        let bytes = enc.finish();

        let mut bs = BitCursor::from_slice(&bytes);
        let mut sbac = Sbac::new(&mut bs).unwrap();
        let mut model = ContextModel::new();
        assert_eq!(sbac.decode_bin(&mut bs, &mut model).unwrap(), 1);
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 0);
        assert_eq!(sbac.decode_bin(&mut bs, &mut model).unwrap(), 0);
        assert_eq!(sbac.decode_bin_trm(&mut bs).unwrap(), 1);
    }
}
