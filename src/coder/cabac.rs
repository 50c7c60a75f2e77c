//! H.264 CABAC binary arithmetic coding
//!
//! Two halves live here. [`CabacDecoder`] is a conformant decoder for the
//! standard's binary arithmetic code; the compress path runs it over the
//! original span bytes to recover the exact symbol sequence the hooked
//! decoder consumes. [`CabacEmitter`] is the reverse direction: it replays
//! a symbol sequence back into a standard-conformant byte stream, built on
//! the generic coder with the probability splits the standard's range
//! table prescribes.
//!
//! Context state bytes use the packed layout shared with the hooked
//! decoder: `(pStateIdx << 1) | valMPS`.

use super::arith;

/// LPS range table, indexed `[pStateIdx][qCodIRangeIdx]` where the
/// quarter index is bits 7..6 of the 9-bit range.
pub const LPS_RANGE: [[u8; 4]; 64] = [
    [128, 176, 208, 240],
    [128, 167, 197, 227],
    [128, 158, 187, 216],
    [123, 150, 178, 205],
    [116, 142, 169, 195],
    [111, 135, 160, 185],
    [105, 128, 152, 175],
    [100, 122, 144, 166],
    [95, 116, 137, 158],
    [90, 110, 130, 150],
    [85, 104, 123, 142],
    [81, 99, 117, 135],
    [77, 94, 111, 128],
    [73, 89, 105, 122],
    [69, 85, 100, 116],
    [66, 80, 95, 110],
    [62, 76, 90, 104],
    [59, 72, 86, 99],
    [56, 69, 81, 94],
    [53, 65, 77, 89],
    [51, 62, 73, 85],
    [48, 59, 69, 80],
    [46, 56, 66, 76],
    [43, 53, 63, 72],
    [41, 50, 59, 69],
    [39, 48, 56, 65],
    [37, 45, 54, 62],
    [35, 43, 51, 59],
    [33, 41, 48, 56],
    [32, 39, 46, 53],
    [30, 37, 43, 50],
    [29, 35, 41, 48],
    [27, 33, 39, 45],
    [26, 31, 37, 43],
    [24, 30, 35, 41],
    [23, 28, 33, 39],
    [22, 27, 32, 37],
    [21, 26, 30, 35],
    [20, 24, 29, 33],
    [19, 23, 27, 31],
    [18, 22, 26, 30],
    [17, 21, 25, 28],
    [16, 20, 23, 27],
    [15, 19, 22, 25],
    [14, 18, 21, 24],
    [14, 17, 20, 23],
    [13, 16, 19, 22],
    [12, 15, 18, 21],
    [12, 14, 17, 20],
    [11, 14, 16, 19],
    [11, 13, 15, 18],
    [10, 12, 15, 17],
    [10, 12, 14, 16],
    [9, 11, 13, 15],
    [9, 11, 12, 14],
    [8, 10, 12, 14],
    [8, 9, 11, 13],
    [7, 9, 11, 12],
    [7, 9, 10, 12],
    [7, 8, 10, 11],
    [6, 8, 9, 11],
    [6, 7, 9, 10],
    [6, 7, 8, 9],
    [2, 2, 2, 2],
];

/// Probability state transition after coding the less probable symbol.
pub const LPS_STATE: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12, 13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21,
    21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33, 33, 33, 34,
    34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Probability state transition after coding the most probable symbol.
pub const MPS_STATE: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50,
    51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// Advance a packed context state after the most probable symbol.
#[inline]
pub fn update_state_mps(state: &mut u8) {
    *state = (MPS_STATE[(*state >> 1) as usize] << 1) | (*state & 1);
}

/// Advance a packed context state after the less probable symbol. At
/// state index 0 the most probable symbol flips.
#[inline]
pub fn update_state_lps(state: &mut u8) {
    let pstate = *state >> 1;
    let mps = if pstate == 0 { (*state & 1) ^ 1 } else { *state & 1 };
    *state = (LPS_STATE[pstate as usize] << 1) | mps;
}

/// Standard H.264 binary arithmetic decoder
///
/// Owns the span bytes it decodes. Bits past the end of the buffer read
/// as zero, which lets the caller drain a span whose final stop bit was
/// padded away.
pub struct CabacDecoder {
    data: Vec<u8>,
    bit_pos: usize,
    range: u32,
    offset: u32,
}

impl CabacDecoder {
    pub fn new(data: Vec<u8>) -> Self {
        let mut decoder = CabacDecoder {
            data,
            bit_pos: 0,
            range: 0x1FE,
            offset: 0,
        };
        for _ in 0..9 {
            decoder.offset = (decoder.offset << 1) | decoder.read_bit();
        }
        decoder
    }

    /// Decode one context-coded decision, advancing the context state.
    pub fn decision(&mut self, state: &mut u8) -> bool {
        let pstate = (*state >> 1) as usize;
        let qidx = ((self.range >> 6) & 3) as usize;
        let lps = LPS_RANGE[pstate][qidx] as u32;
        self.range -= lps;
        let symbol;
        if self.offset >= self.range {
            self.offset -= self.range;
            self.range = lps;
            symbol = (*state & 1) == 0;
            update_state_lps(state);
        } else {
            symbol = (*state & 1) == 1;
            update_state_mps(state);
        }
        while self.range < 0x100 {
            self.range <<= 1;
            self.offset = (self.offset << 1) | self.read_bit();
        }
        symbol
    }

    /// Decode one bypass-coded decision at probability 1/2.
    pub fn bypass(&mut self) -> bool {
        self.offset = (self.offset << 1) | self.read_bit();
        if self.offset >= self.range {
            self.offset -= self.range;
            true
        } else {
            false
        }
    }

    /// Decode the end-of-slice decision.
    pub fn terminate(&mut self) -> bool {
        self.range -= 2;
        if self.offset >= self.range {
            true
        } else {
            while self.range < 0x100 {
                self.range <<= 1;
                self.offset = (self.offset << 1) | self.read_bit();
            }
            false
        }
    }

    /// Bytes consumed so far, rounded up to a whole byte.
    pub fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    fn read_bit(&mut self) -> u32 {
        let byte = self.data.get(self.bit_pos / 8).copied().unwrap_or(0) as u32;
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
        self.bit_pos += 1;
        bit
    }
}

/// Minimum range of the re-encoder; keeps the effective 9-bit range on
/// an even grid so the bypass split at range/2 is always exact.
const EMIT_MIN_RANGE: u64 = 0x200;

/// Initial range, aligned so `range >> normalize` starts at 0x1FE as the
/// standard requires.
const EMIT_INITIAL_RANGE: u64 = 0x1FE << 54;

/// Bit-exact CABAC re-encoder
///
/// Replays decisions into the byte stream the standard encoder would
/// have produced, by driving the generic fixed-point coder with the
/// standard's LPS range splits. The trailing bytes are subject to the
/// standard's stop-bit padding ambiguity; the envelope's length-parity
/// and last-byte fields compensate on the decompress path.
pub struct CabacEmitter {
    encoder: arith::Encoder<u16>,
}

impl CabacEmitter {
    pub fn new() -> Self {
        CabacEmitter {
            encoder: arith::Encoder::with_range(EMIT_INITIAL_RANGE, EMIT_MIN_RANGE),
        }
    }

    /// Re-encode one context-coded decision, advancing the context state.
    pub fn put(&mut self, symbol: bool, state: &mut u8) {
        let pstate = (*state >> 1) as usize;
        let is_lps = symbol != ((*state & 1) == 1);
        self.encoder.put(is_lps, |range| {
            // Normalize so the range reads as a 9-bit value, then split
            // by the standard's table entry at that scale.
            let normalize = (range / 0x100).ilog2();
            let approx = (range >> normalize) as u32;
            let qidx = ((approx >> 6) & 3) as usize;
            (LPS_RANGE[pstate][qidx] as u64) << normalize
        });
        if is_lps {
            update_state_lps(state);
        } else {
            update_state_mps(state);
        }
    }

    /// Re-encode one bypass decision at probability exactly 1/2.
    pub fn put_bypass(&mut self, symbol: bool) {
        self.encoder.put(symbol, |range| range / 2);
    }

    /// Re-encode the end-of-slice decision; `true` flushes the stream.
    pub fn put_terminate(&mut self, end_of_stream: bool) {
        self.encoder.put(end_of_stream, |range| {
            let normalize = (range / 0x100).ilog2();
            2u64 << normalize
        });
        if end_of_stream {
            self.encoder.finish();
        }
    }

    /// Finish and return the reconstructed bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.encoder.into_bytes()
    }
}

impl Default for CabacEmitter {
    fn default() -> Self {
        Self::new()
    }
}
