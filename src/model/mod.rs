//! Predictive model for recoded CABAC symbols
//!
//! For every binary decision the hooked decoder consumes, the model
//! produces a probability for the arithmetic coder and then updates a
//! per-context estimator with the observed outcome. Contexts are keyed
//! by the decoder's context ordinal plus whatever walk state sharpens
//! the prediction; the significance-map path carries the bulk of the
//! gain and gets the richest keys.
//!
//! The walk state machine follows the hooked decoder through each
//! sub-block: plain decisions pass through, significance maps alternate
//! between coefficient flags and end-of-block flags, and the nonzero
//! count of each sub-block is coded as its own short prefix so both
//! sides agree on the total before the map symbols themselves are coded.

pub mod frame;
pub mod neighbors;
pub mod tables;

use std::collections::HashMap;

use self::frame::FramePair;
use self::neighbors::CoefficientCoord;
use self::tables::{
    CAT_LOOKUP, SIG_COEFF_FLAG_OFFSET_8X8, SIG_COEFF_OFFSET_DC, ZIGZAG_16, ZIGZAG_64,
};

/// Ordinal of one entry in the hooked decoder's context-state array.
pub type CtxId = u32;

/// Estimator saturation: counts are halved once their sum passes this.
pub const ESTIMATOR_CAP: u16 = 0x60;

/// Tighter saturation inside the significance map, which adapts faster.
pub const SIG_ESTIMATOR_CAP: u16 = 0x50;

/// Prior weight against the end-of-slice symbol.
const TERMINATE_PRIOR_NEG: u16 = 0x180 / 2;

/// Phase of the CABAC walk, as reported by the hooked decoder and
/// refined by the model's own transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodingType {
    /// No extra keying; decisions pass through on their raw context.
    Unknown,
    /// Per-coefficient significance flags of one sub-block.
    SignificanceMap,
    /// The "was that the last nonzero?" flag after a significant
    /// coefficient.
    EndOfBlock,
    /// The bitwise nonzero-count prefix coded ahead of a map.
    NonzeroCount,
    /// Coefficient magnitudes and signs; pass-through.
    Residuals,
    /// The walk cannot produce further symbols for this sub-block.
    Unreachable,
}

/// Context half of a model key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Context {
    /// A context in the hooked decoder's state array.
    Coded(CtxId),
    /// The shared bypass context.
    Bypass,
    /// The end-of-slice context.
    Terminate,
    /// Significance-map flags.
    Significance,
    /// One bit position of the nonzero-count prefix.
    NonzeroCount(u8),
}

/// Key under which one (pos, neg) estimator lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub context: Context,
    pub param0: u32,
    pub param1: u32,
}

impl ModelKey {
    pub fn plain(context: Context) -> Self {
        ModelKey {
            context,
            param0: 0,
            param1: 0,
        }
    }
}

/// Laplace-smoothed event counts; both start at 1.
#[derive(Clone, Copy)]
struct Estimator {
    pos: u16,
    neg: u16,
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator { pos: 1, neg: 1 }
    }
}

/// Outcome of feeding one significance-walk symbol to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigEvent {
    /// The map continues; more flags follow.
    Continue,
    /// The map just completed and the sub-block total is now known.
    MapComplete,
}

#[derive(Clone, Copy, Default)]
struct SubBlockState {
    cat: u8,
    scan8_index: u8,
    max_coeff: u8,
    is_dc: bool,
    chroma422: bool,
    zigzag_index: u8,
    nonzeros_observed: u8,
    total_nonzeros: Option<u8>,
}

/// The per-engine model: estimator map, walk state, and the two frame
/// buffers that feed spatial and temporal prediction.
pub struct Model {
    estimators: HashMap<ModelKey, Estimator>,
    coding_type: CodingType,
    mb_x: u32,
    mb_y: u32,
    sub: SubBlockState,
    frames: FramePair,
}

impl Model {
    pub fn new() -> Self {
        let mut model = Model {
            estimators: HashMap::new(),
            coding_type: CodingType::Unknown,
            mb_x: 0,
            mb_y: 0,
            sub: SubBlockState::default(),
            frames: FramePair::new(),
        };
        model.reset();
        model
    }

    /// Clear the estimators for a new CABAC span. Frame buffers persist;
    /// they carry prediction state across spans and frames.
    pub fn reset(&mut self) {
        self.estimators.clear();
        self.estimators.insert(
            ModelKey::plain(Context::Terminate),
            Estimator {
                pos: 1,
                neg: TERMINATE_PRIOR_NEG,
            },
        );
        self.coding_type = CodingType::Unknown;
        self.sub = SubBlockState::default();
    }

    pub fn coding_type(&self) -> CodingType {
        self.coding_type
    }

    // -------------------------------------------------------------------------
    // Hook-driven walk updates
    // -------------------------------------------------------------------------

    pub fn frame_spec(&mut self, frame_num: i32, mb_width: u32, mb_height: u32) {
        self.frames.frame_spec(frame_num, mb_width, mb_height);
    }

    pub fn mb_xy(&mut self, x: u32, y: u32) {
        self.mb_x = x;
        self.mb_y = y;
    }

    pub fn begin_sub_mb(&mut self, cat: u8, scan8_index: u8, max_coeff: u8, is_dc: bool, chroma422: bool) {
        debug_assert!((cat as usize) < CAT_LOOKUP.len());
        self.sub = SubBlockState {
            cat,
            scan8_index,
            max_coeff,
            is_dc,
            chroma422,
            zigzag_index: 0,
            nonzeros_observed: 0,
            total_nonzeros: None,
        };
        let (mb_x, mb_y) = (self.mb_x, self.mb_y);
        let is_8x8 = max_coeff > 32;
        if let Some(meta) = self.current_meta_mut(mb_x, mb_y) {
            meta.coded = true;
            if is_8x8 {
                meta.is_8x8 = true;
            }
        }
    }

    pub fn end_sub_mb(&mut self) {
        self.coding_type = CodingType::Unknown;
    }

    pub fn begin_coding_type(&mut self, coding_type: CodingType, zigzag_index: u8) {
        self.coding_type = coding_type;
        if coding_type == CodingType::SignificanceMap {
            self.sub.zigzag_index = zigzag_index;
            self.sub.nonzeros_observed = 0;
        }
    }

    pub fn end_coding_type(&mut self, _coding_type: CodingType) {
        self.coding_type = CodingType::Unknown;
    }

    // -------------------------------------------------------------------------
    // Estimators
    // -------------------------------------------------------------------------

    /// Share of `range` carried by the `1` outcome under `key`.
    pub fn probability_of_1(&self, range: u64, key: &ModelKey) -> u64 {
        let estimator = self.estimators.get(key).copied().unwrap_or_default();
        let total = (estimator.pos + estimator.neg) as u64;
        (range / total) * estimator.pos as u64
    }

    /// Record the observed outcome for `key`, halving the counts once
    /// they hit the context's saturation cap.
    pub fn update(&mut self, key: ModelKey, symbol: bool) {
        let cap = match key.context {
            Context::Significance => SIG_ESTIMATOR_CAP,
            _ => ESTIMATOR_CAP,
        };
        let estimator = self.estimators.entry(key).or_default();
        if symbol {
            estimator.pos += 1;
        } else {
            estimator.neg += 1;
        }
        if estimator.pos + estimator.neg > cap {
            estimator.pos = (estimator.pos + 1) / 2;
            estimator.neg = (estimator.neg + 1) / 2;
        }
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    /// Key for a significance flag at the given walk position.
    ///
    /// Besides the running counts, the key carries the significance of
    /// the coefficients left of and above this one. Both neighbours sit
    /// on an earlier anti-diagonal of the scan, so their residual bits
    /// are settled before this flag is coded on either side.
    pub fn significance_key(&self, zigzag_index: u8, observed: u8) -> ModelKey {
        let total = self.sub.total_nonzeros.unwrap_or(0);
        let zigzag_offset = if self.sub.max_coeff > 32 {
            SIG_COEFF_FLAG_OFFSET_8X8[zigzag_index as usize]
        } else if self.sub.is_dc && self.sub.chroma422 {
            SIG_COEFF_OFFSET_DC[zigzag_index as usize]
        } else {
            zigzag_index
        };
        let left_sig = self.coefficient_sig(false, zigzag_index);
        let above_sig = self.coefficient_sig(true, zigzag_index);
        let cat = (self.sub.cat as usize).min(CAT_LOOKUP.len() - 1);
        ModelKey {
            context: Context::Significance,
            param0: 64 * total as u32
                + observed as u32
                + 8192 * left_sig
                + 24576 * above_sig,
            param1: self.sub.is_dc as u32 + 2 * zigzag_offset as u32 + 32 * CAT_LOOKUP[cat] as u32,
        }
    }

    /// Significance of the coefficient left of (or above) the one at
    /// `zigzag_index`: 1 or 0 when known, 2 when the neighbour falls
    /// outside the frame.
    fn coefficient_sig(&self, above: bool, zigzag_index: u8) -> u32 {
        // AC blocks store their coefficients shifted past the absent DC
        // position; query the neighbour in the same raster space.
        let query = if !self.sub.is_dc && self.sub.max_coeff <= 32 {
            zigzag_index + (16 - self.sub.max_coeff.min(16))
        } else {
            zigzag_index
        };
        let coord = CoefficientCoord {
            mb_x: self.mb_x,
            mb_y: self.mb_y,
            scan8_index: self.sub.scan8_index,
            zigzag_index: query,
        };
        let neighbor = match neighbors::get_neighbor_coefficient(above, self.sub.max_coeff, &coord)
        {
            Some(neighbor) => neighbor,
            None => return 2,
        };
        if !self.current_block_in_bounds(neighbor.mb_x, neighbor.mb_y) {
            return 2;
        }
        let raster = if self.sub.max_coeff > 32 {
            ZIGZAG_64[neighbor.zigzag_index as usize]
        } else if self.sub.is_dc && self.sub.max_coeff != 16 {
            neighbor.zigzag_index
        } else {
            ZIGZAG_16[neighbor.zigzag_index as usize]
        };
        let offset =
            neighbor.scan8_index as usize * frame::COEFFS_PER_SUB_BLOCK + raster as usize;
        let block = self.frames.current().at(neighbor.mb_x, neighbor.mb_y);
        if offset >= block.residual.len() {
            return 2;
        }
        (block.residual[offset] != 0) as u32
    }

    /// Key for one bit of the nonzero-count prefix. The neighbours'
    /// relation to `threshold` folds temporal and spatial prediction
    /// into the key: 1 means at least `threshold` nonzeros, 0 means
    /// fewer, 2 means the neighbour is unknown.
    pub fn nonzero_bit_key(&self, bit_index: u8, serialized_so_far: u32, threshold: u8) -> ModelKey {
        let coord = CoefficientCoord {
            mb_x: self.mb_x,
            mb_y: self.mb_y,
            scan8_index: self.sub.scan8_index,
            zigzag_index: 0,
        };
        let prev_ge = self.prev_frame_ge(threshold);
        let left_ge = self.neighbor_ge(false, &coord, threshold);
        let above_ge = self.neighbor_ge(true, &coord, threshold);
        let cat = (self.sub.cat as usize).min(CAT_LOOKUP.len() - 1);
        ModelKey {
            context: Context::NonzeroCount(bit_index),
            param0: serialized_so_far + 128 * prev_ge + 256 * left_ge + 768 * above_ge,
            param1: (self.sub.max_coeff > 32) as u32
                + 2 * self.sub.is_dc as u32
                + self.sub.chroma422 as u32
                + 4 * cat as u32,
        }
    }

    /// Width in bits of the nonzero-count prefix: enough to represent
    /// every count up to the sub-block's coefficient capacity.
    pub fn nonzero_prefix_width(&self) -> u8 {
        let max = self.sub.max_coeff as u16;
        (16 - max.leading_zeros()) as u8
    }

    // -------------------------------------------------------------------------
    // Significance walk
    // -------------------------------------------------------------------------

    /// Feed one significance flag into the walk.
    pub fn observe_significance(&mut self, symbol: bool) -> SigEvent {
        if symbol {
            self.record_significant(self.sub.zigzag_index);
            self.sub.nonzeros_observed += 1;
            self.coding_type = CodingType::EndOfBlock;
            SigEvent::Continue
        } else {
            self.advance_zigzag()
        }
    }

    /// Feed one end-of-block flag into the walk.
    pub fn observe_end_of_block(&mut self, last: bool) -> SigEvent {
        if last {
            self.finish_map()
        } else {
            self.advance_zigzag()
        }
    }

    /// The end-of-block flag is fully determined once the sub-block
    /// total is known: it fires exactly when the observed count reaches
    /// it. Neither side codes it.
    pub fn end_of_block_flag(&self) -> bool {
        self.sub
            .total_nonzeros
            .map_or(false, |total| total == self.sub.nonzeros_observed)
    }

    pub fn total_nonzeros(&self) -> Option<u8> {
        self.sub.total_nonzeros
    }

    /// Install the decoded nonzero-count prefix ahead of a map replay.
    pub fn set_total_nonzeros(&mut self, total: u8) {
        self.sub.total_nonzeros = Some(total);
    }

    pub fn nonzeros_observed(&self) -> u8 {
        self.sub.nonzeros_observed
    }

    pub fn zigzag_index(&self) -> u8 {
        self.sub.zigzag_index
    }

    fn advance_zigzag(&mut self) -> SigEvent {
        self.sub.zigzag_index += 1;
        if self.sub.zigzag_index + 1 == self.sub.max_coeff {
            // No flag is coded for the final position; reaching it means
            // the last coefficient is significant by construction.
            self.record_significant(self.sub.zigzag_index);
            self.sub.nonzeros_observed += 1;
            self.finish_map()
        } else {
            self.coding_type = CodingType::SignificanceMap;
            SigEvent::Continue
        }
    }

    fn finish_map(&mut self) -> SigEvent {
        self.coding_type = CodingType::Unreachable;
        let total = self.sub.nonzeros_observed;
        self.sub.total_nonzeros = Some(total);

        let scan8_index = self.sub.scan8_index as usize;
        let is_8x8 = self.sub.max_coeff > 32;
        let (mb_x, mb_y) = (self.mb_x, self.mb_y);
        if let Some(meta) = self.current_meta_mut(mb_x, mb_y) {
            if is_8x8 {
                // Spread the 8x8 total over its four 4x4 slots.
                for slot in scan8_index..(scan8_index + 4).min(meta.num_nonzeros.len()) {
                    meta.num_nonzeros[slot] = (total + 3) / 4;
                }
            } else if scan8_index < meta.num_nonzeros.len() {
                meta.num_nonzeros[scan8_index] = total;
            }
        }
        SigEvent::MapComplete
    }

    fn record_significant(&mut self, zigzag_index: u8) {
        let raster = if self.sub.max_coeff > 32 {
            ZIGZAG_64[zigzag_index as usize]
        } else if self.sub.is_dc {
            if self.sub.max_coeff == 16 {
                ZIGZAG_16[zigzag_index as usize]
            } else {
                zigzag_index
            }
        } else {
            // 15-coefficient AC blocks skip the DC position.
            let skip = 16 - self.sub.max_coeff.min(16);
            ZIGZAG_16[(zigzag_index + skip) as usize]
        };
        let offset = self.sub.scan8_index as usize * frame::COEFFS_PER_SUB_BLOCK + raster as usize;
        let (mb_x, mb_y) = (self.mb_x, self.mb_y);
        if self.current_block_in_bounds(mb_x, mb_y) {
            let block = self.frames.current_mut().at_mut(mb_x, mb_y);
            if offset < block.residual.len() {
                block.residual[offset] = 1;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Frame lookups
    // -------------------------------------------------------------------------

    /// Read access to the frame pair, for tests and diagnostics.
    pub fn frames(&self) -> &FramePair {
        &self.frames
    }

    fn prev_frame_ge(&self, threshold: u8) -> u32 {
        let prev = self.frames.previous();
        if !prev.is_initialized() || self.mb_x >= prev.width() || self.mb_y >= prev.height() {
            return 2;
        }
        let slot = (self.sub.scan8_index as usize).min(tables::SUB_BLOCKS_PER_MB - 1);
        (prev.meta_at(self.mb_x, self.mb_y).num_nonzeros[slot] >= threshold) as u32
    }

    fn neighbor_ge(&self, above: bool, coord: &CoefficientCoord, threshold: u8) -> u32 {
        let neighbor = match neighbors::get_neighbor(above, self.sub.max_coeff, coord) {
            Some(neighbor) => neighbor,
            None => return 2,
        };
        let current = self.frames.current();
        if !current.is_initialized()
            || neighbor.mb_x >= current.width()
            || neighbor.mb_y >= current.height()
        {
            return 2;
        }
        let slot = (neighbor.scan8_index as usize).min(tables::SUB_BLOCKS_PER_MB - 1);
        (current.meta_at(neighbor.mb_x, neighbor.mb_y).num_nonzeros[slot] >= threshold) as u32
    }

    fn current_block_in_bounds(&self, mb_x: u32, mb_y: u32) -> bool {
        let current = self.frames.current();
        current.is_initialized() && mb_x < current.width() && mb_y < current.height()
    }

    fn current_meta_mut(&mut self, mb_x: u32, mb_y: u32) -> Option<&mut frame::MbMeta> {
        if self.current_block_in_bounds(mb_x, mb_y) {
            Some(self.frames.current_mut().meta_at_mut(mb_x, mb_y))
        } else {
            None
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
