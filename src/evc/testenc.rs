//! Test-only bit writer and SBAC encoder.
//!
//! Mirrors the reference encoder's arithmetic coder so decoder tests can
//! run against real bitstreams instead of hand-assembled bit patterns.

use super::sbac::ContextModel;
use alloc::vec::Vec;

/// MSB-first bit writer
pub struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    filled: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            cur: 0,
            filled: 0,
        }
    }

    pub fn write1(&mut self, bit: u32) {
        self.cur = (self.cur << 1) | (bit & 1) as u8;
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }

    /// Write the low `len` bits of `val`, MSB first
    pub fn write(&mut self, val: u32, len: u32) {
        assert!((1..=32).contains(&len));
        for i in (0..len).rev() {
            self.write1((val >> i) & 1);
        }
    }

    /// Write an unsigned Exp-Golomb code
    pub fn write_ue(&mut self, val: u32) {
        let len_i = (val + 1).ilog2();
        if len_i > 0 {
            self.write(0, len_i); // prefix zeros
        }
        self.write(val + 1, len_i + 1);
    }

    /// Write a signed Exp-Golomb code
    pub fn write_se(&mut self, val: i32) {
        let mapped = if val <= 0 {
            (-val as u32) * 2
        } else {
            (val as u32) * 2 - 1
        };
        self.write_ue(mapped);
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.filled == 0
    }

    /// Pad to the next byte boundary with zero bits
    pub fn flush(&mut self) {
        while self.filled != 0 {
            self.write1(0);
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.bytes
    }
}

/// SBAC encoder, ported from the reference encoder
pub struct SbacEncoder {
    range: u32,
    code: u32,
    code_bits: u32,
    stacked_ff: u32,
    stacked_zero: u32,
    pending_byte: u32,
    is_pending_byte: bool,
    pub out: BitWriter,
}

impl SbacEncoder {
    pub fn new() -> Self {
        Self::with_writer(BitWriter::new())
    }

    /// Start arithmetic coding after previously written (byte-aligned)
    /// header bits
    pub fn with_writer(out: BitWriter) -> Self {
        assert!(out.is_byte_aligned());
        Self {
            range: 16384,
            code: 0,
            code_bits: 11,
            stacked_ff: 0,
            stacked_zero: 0,
            pending_byte: 0,
            is_pending_byte: false,
            out,
        }
    }

    fn put_byte(&mut self, byte: u32) {
        if self.is_pending_byte {
            if self.pending_byte == 0 {
                self.stacked_zero += 1;
            } else {
                while self.stacked_zero > 0 {
                    self.out.write(0x00, 8);
                    self.stacked_zero -= 1;
                }
                self.out.write(self.pending_byte, 8);
            }
        }
        self.pending_byte = byte & 0xFF;
        self.is_pending_byte = true;
    }

    fn carry_propagate(&mut self) {
        let out_bits = self.code >> 17;
        self.code &= (1 << 17) - 1;

        if out_bits < 0xFF {
            while self.stacked_ff != 0 {
                self.put_byte(0xFF);
                self.stacked_ff -= 1;
            }
            self.put_byte(out_bits);
        } else if out_bits > 0xFF {
            self.pending_byte += 1;
            while self.stacked_ff != 0 {
                self.put_byte(0x00);
                self.stacked_ff -= 1;
            }
            self.put_byte(out_bits & 0xFF);
        } else {
            self.stacked_ff += 1;
        }
    }

    fn shift_out(&mut self) {
        self.code <<= 1;
        self.code_bits -= 1;
        if self.code_bits == 0 {
            self.carry_propagate();
            self.code_bits = 8;
        }
    }

    pub fn encode_bin(&mut self, bin: u32, model: &mut ContextModel) {
        let state = u32::from(model.state);
        let mps = u32::from(model.mps);

        let mut lps = (state * self.range) >> 9;
        if lps < 437 {
            lps = 437;
        }

        self.range -= lps;

        if bin != mps {
            if self.range >= lps {
                self.code += self.range;
                self.range = lps;
            }
            let mut state = state + ((512 - state + 16) >> 5);
            let mut mps = mps;
            if state > 256 {
                mps = 1 - mps;
                state = 512 - state;
            }
            model.state = state as u16;
            model.mps = mps as u16;
        } else {
            model.state = (state - ((state + 16) >> 5)) as u16;
        }

        while self.range < 8192 {
            self.range <<= 1;
            self.shift_out();
        }
    }

    pub fn encode_bin_ep(&mut self, bin: u32) {
        self.range >>= 1;
        if bin != 0 {
            self.code += self.range;
        }
        self.range <<= 1;
        self.shift_out();
    }

    pub fn encode_bin_trm(&mut self, bin: u32) {
        self.range -= 1;
        if bin != 0 {
            self.code += self.range;
            self.range = 1;
        }
        while self.range < 8192 {
            self.range <<= 1;
            self.shift_out();
        }
    }

    pub fn write_unary_sym(&mut self, sym: u32, models: &mut [ContextModel]) {
        let num_ctx = models.len();
        let mut ctx_idx = 0;

        self.encode_bin(if sym != 0 { 1 } else { 0 }, &mut models[0]);
        if sym == 0 {
            return;
        }

        let mut sym = sym;
        while sym > 0 {
            sym -= 1;
            if ctx_idx < num_ctx - 1 {
                ctx_idx += 1;
            }
            self.encode_bin(if sym != 0 { 1 } else { 0 }, &mut models[ctx_idx]);
        }
    }

    pub fn write_truncate_unary_sym(&mut self, sym: u32, models: &mut [ContextModel], max_num: u32) {
        let num_ctx = models.len() as u32;
        if max_num > 1 {
            for ctx_idx in 0..max_num - 1 {
                let symbol = if ctx_idx == sym { 0 } else { 1 };
                let idx = ctx_idx.min(num_ctx - 1) as usize;
                self.encode_bin(symbol, &mut models[idx]);
                if symbol == 0 {
                    break;
                }
            }
        }
    }

    pub fn write_unary_sym_ep(&mut self, sym: u32, max_val: u32) {
        let mut counter = 1;
        self.encode_bin_ep(if sym != 0 { 1 } else { 0 });
        if sym == 0 {
            return;
        }
        let mut sym = sym;
        while sym > 0 {
            sym -= 1;
            if counter < max_val {
                self.encode_bin_ep(if sym != 0 { 1 } else { 0 });
                counter += 1;
            }
        }
    }

    pub fn encode_bins_ep(&mut self, value: u32, num_bin: u32) {
        for bin in (0..num_bin).rev() {
            self.encode_bin_ep((value >> bin) & 1);
        }
    }

    /// Flush the arithmetic coder and return the byte stream.
    ///
    /// Four zero bytes are appended so a decoder's lookahead
    /// renormalization never starves near the end of the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        let mut tmp = (self.code + self.range - 1) & (0xFFFF_FFFFu32 << 14);
        if tmp < self.code {
            tmp += 8192;
        }

        self.code = tmp << self.code_bits;
        self.carry_propagate();

        self.code <<= 8;
        self.carry_propagate();

        while self.stacked_zero > 0 {
            self.out.write(0x00, 8);
            self.stacked_zero -= 1;
        }
        if self.pending_byte != 0 {
            self.out.write(self.pending_byte, 8);
        } else if self.code_bits < 4 {
            self.out.write(0, 4 - self.code_bits);
            while !self.out.is_byte_aligned() {
                self.out.write1(0);
            }
        }

        let mut bytes = self.out.into_bytes();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes
    }
}
