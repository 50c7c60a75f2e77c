//! Compress engine
//!
//! Feeds the original file to the hooked decoder, and for every CABAC
//! span the decoder opens, re-derives the span's decisions with a
//! standard CABAC decoder while coding them through the model into an
//! arithmetic payload. Byte ranges the decoder consumed outside of
//! recodable spans travel as literals; spans that cannot be matched
//! back to the source (typically NAL-escaped ones) are marked
//! skip-coded and ride along inside the surrounding literal.

use std::collections::HashMap;

use tracing::debug;

use crate::coder::arith;
use crate::coder::cabac::CabacDecoder;
use crate::error::{Error, Result};
use crate::model::{CodingType, Context, Model, ModelKey, SigEvent};

use super::driver::{CodingHooks, CtxId, HookedDecoder, SpanDisposition, SpanId};
use super::envelope::{Block, CabacBlock, Envelope};
use super::splice::{find_span, SURROGATE_MARKER_BYTES};

/// One deferred significance flag, with the walk position it was
/// observed at.
struct QueuedSignificance {
    zigzag_index: u8,
    observed: u8,
    symbol: bool,
}

/// Per-span coder on the compress side.
struct SpanEncoder {
    cabac: CabacDecoder,
    ac: arith::Encoder<u8>,
    block_index: usize,
    queue: Vec<QueuedSignificance>,
    done: bool,
}

/// The compress engine. Implements the coding hooks; one instance
/// processes one file.
pub struct Compressor {
    original: Vec<u8>,
    read_offset: usize,
    prev_coded_block_end: usize,
    blocks: Vec<Block>,
    model: Model,
    spans: HashMap<SpanId, SpanEncoder>,
    next_span_id: SpanId,
}

impl Compressor {
    pub fn new(original: Vec<u8>) -> Self {
        Compressor {
            original,
            read_offset: 0,
            prev_coded_block_end: 0,
            blocks: Vec::new(),
            model: Model::new(),
            spans: HashMap::new(),
            next_span_id: 0,
        }
    }

    /// Drive the decoder over the whole input and return the envelope.
    pub fn run(&mut self, decoder: &mut dyn HookedDecoder) -> Result<Envelope> {
        decoder.decode_video(self)?;
        if self.spans.values().any(|span| !span.done) {
            return Err(Error::recode("a CABAC span was opened but never terminated"));
        }
        // Everything after the last recoded span is one final literal.
        self.blocks.push(Block::Literal(
            self.original[self.prev_coded_block_end..].to_vec(),
        ));
        Ok(Envelope {
            blocks: std::mem::take(&mut self.blocks),
        })
    }

    /// Locate `data` in the already-handed-out window of the source.
    /// On a match, emit the literal gap and reserve a CABAC block;
    /// otherwise record a skip-coded block.
    fn find_next_coded_block_and_emit_literal(&mut self, data: &[u8]) -> Option<usize> {
        let window = &self.original[self.prev_coded_block_end..self.read_offset];
        match find_span(window, data) {
            Some(gap) if data.len() >= SURROGATE_MARKER_BYTES => {
                let start = self.prev_coded_block_end + gap;
                self.blocks.push(Block::Literal(
                    self.original[self.prev_coded_block_end..start].to_vec(),
                ));
                self.prev_coded_block_end = start + data.len();
                self.blocks.push(Block::Cabac(CabacBlock {
                    size: data.len() as u32,
                    length_parity: data.len() % 2 == 1,
                    last_byte: *data.last().expect("span is at least 8 bytes"),
                    payload: Vec::new(),
                }));
                Some(self.blocks.len() - 1)
            }
            _ => {
                // Probably NAL-escaped; the bytes stay in the literal
                // stream and the span is decoded natively.
                debug!(size = data.len(), "skip-coded CABAC span");
                self.blocks.push(Block::SkipCoded {
                    size: data.len() as u32,
                });
                None
            }
        }
    }

    /// Emit the nonzero-count prefix and replay the deferred map
    /// symbols, now that the sub-block total is known.
    fn flush_significance(span: &mut SpanEncoder, model: &mut Model) -> Result<()> {
        let total = model
            .total_nonzeros()
            .ok_or_else(|| Error::recode("significance map completed without a total"))?;
        let width = model.nonzero_prefix_width();
        let mut serialized = 0u32;
        for bit_index in 0..width {
            let weight = 1u8 << (width - 1 - bit_index);
            let bit = total & weight != 0;
            let key = model.nonzero_bit_key(bit_index, serialized, weight);
            span.ac.put(bit, |range| model.probability_of_1(range, &key));
            model.update(key, bit);
            serialized = (serialized << 1) | bit as u32;
        }
        for queued in span.queue.drain(..) {
            let key = model.significance_key(queued.zigzag_index, queued.observed);
            span.ac
                .put(queued.symbol, |range| model.probability_of_1(range, &key));
            model.update(key, queued.symbol);
        }
        Ok(())
    }

    fn span_mut(
        spans: &mut HashMap<SpanId, SpanEncoder>,
        span: SpanId,
    ) -> Result<&mut SpanEncoder> {
        spans
            .get_mut(&span)
            .ok_or_else(|| Error::recode(format!("unknown CABAC span handle {}", span)))
    }
}

impl CodingHooks for Compressor {
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.original.len() - self.read_offset);
        buf[..n].copy_from_slice(&self.original[self.read_offset..self.read_offset + n]);
        self.read_offset += n;
        Ok(n)
    }

    fn init_cabac(&mut self, data: &[u8]) -> Result<SpanDisposition> {
        match self.find_next_coded_block_and_emit_literal(data) {
            Some(block_index) => {
                self.model.reset();
                let id = self.next_span_id;
                self.next_span_id += 1;
                self.spans.insert(
                    id,
                    SpanEncoder {
                        cabac: CabacDecoder::new(data.to_vec()),
                        ac: arith::Encoder::new(),
                        block_index,
                        queue: Vec::new(),
                        done: false,
                    },
                );
                Ok(SpanDisposition::Hooked(id))
            }
            None => Ok(SpanDisposition::Native),
        }
    }

    fn cabac_get(&mut self, span: SpanId, ctx: CtxId, state: &mut u8) -> Result<bool> {
        let Compressor { spans, model, .. } = self;
        let span = Self::span_mut(spans, span)?;
        let symbol = span.cabac.decision(state);
        match model.coding_type() {
            CodingType::SignificanceMap => {
                span.queue.push(QueuedSignificance {
                    zigzag_index: model.zigzag_index(),
                    observed: model.nonzeros_observed(),
                    symbol,
                });
                if model.observe_significance(symbol) == SigEvent::MapComplete {
                    Self::flush_significance(span, model)?;
                }
            }
            CodingType::EndOfBlock => {
                // Determined by the nonzero total on the reverse path;
                // drives the walk but is never coded.
                if model.observe_end_of_block(symbol) == SigEvent::MapComplete {
                    Self::flush_significance(span, model)?;
                }
            }
            _ => {
                let key = ModelKey::plain(Context::Coded(ctx));
                span.ac.put(symbol, |range| model.probability_of_1(range, &key));
                model.update(key, symbol);
            }
        }
        Ok(symbol)
    }

    fn cabac_get_bypass(&mut self, span: SpanId) -> Result<bool> {
        let Compressor { spans, model, .. } = self;
        let span = Self::span_mut(spans, span)?;
        if matches!(
            model.coding_type(),
            CodingType::SignificanceMap | CodingType::EndOfBlock
        ) {
            return Err(Error::recode("bypass decision inside a significance map"));
        }
        let symbol = span.cabac.bypass();
        let key = ModelKey::plain(Context::Bypass);
        span.ac.put(symbol, |range| model.probability_of_1(range, &key));
        model.update(key, symbol);
        Ok(symbol)
    }

    fn cabac_get_terminate(&mut self, span_id: SpanId) -> Result<bool> {
        let Compressor {
            spans,
            model,
            blocks,
            ..
        } = self;
        let span = Self::span_mut(spans, span_id)?;
        let symbol = span.cabac.terminate();
        let key = ModelKey::plain(Context::Terminate);
        span.ac.put(symbol, |range| model.probability_of_1(range, &key));
        model.update(key, symbol);
        if symbol {
            if !span.queue.is_empty() {
                return Err(Error::recode(
                    "span terminated with an unflushed significance map",
                ));
            }
            span.ac.finish();
            match &mut blocks[span.block_index] {
                Block::Cabac(cabac) => cabac.payload = span.ac.data().to_vec(),
                _ => {
                    return Err(Error::recode(format!(
                        "span handle {} does not point at a CABAC block",
                        span_id
                    )))
                }
            }
            span.done = true;
            debug!(
                block = span.block_index,
                payload = span.ac.data().len(),
                "CABAC span recoded"
            );
        }
        Ok(symbol)
    }

    fn frame_spec(&mut self, frame_num: i32, mb_width: u32, mb_height: u32) {
        self.model.frame_spec(frame_num, mb_width, mb_height);
    }

    fn mb_xy(&mut self, x: u32, y: u32) {
        self.model.mb_xy(x, y);
    }

    fn begin_sub_mb(&mut self, cat: u8, scan8_index: u8, max_coeff: u8, is_dc: bool, chroma422: bool) {
        self.model
            .begin_sub_mb(cat, scan8_index, max_coeff, is_dc, chroma422);
    }

    fn end_sub_mb(&mut self) {
        self.model.end_sub_mb();
    }

    fn begin_coding_type(
        &mut self,
        coding_type: CodingType,
        zigzag_index: u8,
        _param0: u32,
        _param1: u32,
    ) {
        self.model.begin_coding_type(coding_type, zigzag_index);
    }

    fn end_coding_type(&mut self, coding_type: CodingType) {
        self.model.end_coding_type(coding_type);
    }
}
