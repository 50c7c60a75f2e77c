//! Decompress engine
//!
//! Synthesizes the hooked decoder's input from the envelope, replacing
//! every recoded span with a same-sized surrogate block. When the
//! decoder opens a CABAC span, the engine matches the surrogate marker
//! to the pending envelope block, then answers every decision request
//! from the arithmetic payload and the model while replaying the
//! decisions into a standard CABAC re-encoder. Once the span
//! terminates, the re-encoded bytes — after the stop-bit fixups — are
//! the original span, byte for byte.

use std::collections::HashMap;

use tracing::debug;

use crate::coder::arith;
use crate::coder::cabac::CabacEmitter;
use crate::error::{Error, Result};
use crate::model::{CodingType, Context, Model, ModelKey};

use super::driver::{CodingHooks, CtxId, HookedDecoder, SpanDisposition, SpanId};
use super::envelope::{Block, Envelope};
use super::splice::{make_surrogate_block, surrogate_marker, SURROGATE_MARKER_BYTES};

/// Reconstruction state of one envelope block.
#[derive(Default)]
struct BlockState {
    /// Whether a CABAC span init is expected for this block.
    coded: bool,
    /// Marker assigned when the block's surrogate entered the stream.
    marker: Option<[u8; SURROGATE_MARKER_BYTES]>,
    /// Reconstructed bytes (recoded blocks only).
    out: Vec<u8>,
    done: bool,
}

/// Per-span coder on the decompress side.
struct SpanDecoder {
    block_index: usize,
    ac: arith::Decoder<u8>,
    emit: CabacEmitter,
}

/// The decompress engine. Implements the coding hooks; one instance
/// reconstructs one file.
pub struct Decompressor {
    envelope: Envelope,
    states: Vec<BlockState>,
    read_index: usize,
    read_offset: usize,
    read_block: Option<Vec<u8>>,
    next_coded_block: usize,
    marker_sequence: u64,
    model: Model,
    spans: HashMap<SpanId, SpanDecoder>,
    next_span_id: SpanId,
}

impl Decompressor {
    pub fn new(envelope: Envelope) -> Self {
        let mut states = Vec::with_capacity(envelope.blocks.len());
        for block in &envelope.blocks {
            let mut state = BlockState::default();
            match block {
                Block::Literal(_) => state.done = true,
                Block::Cabac(_) => state.coded = true,
                Block::SkipCoded { .. } => {
                    state.coded = true;
                    state.done = true;
                }
            }
            states.push(state);
        }
        Decompressor {
            envelope,
            states,
            read_index: 0,
            read_offset: 0,
            read_block: None,
            next_coded_block: 0,
            marker_sequence: 1,
            model: Model::new(),
            spans: HashMap::new(),
            next_span_id: 0,
        }
    }

    /// Drive the decoder over the synthesized stream and reassemble the
    /// original bytes.
    pub fn run(&mut self, decoder: &mut dyn HookedDecoder) -> Result<Vec<u8>> {
        decoder.decode_video(self)?;
        let mut out = Vec::new();
        for (index, block) in self.envelope.blocks.iter().enumerate() {
            if !self.states[index].done {
                return Err(Error::decoder(format!(
                    "block {} was never reconstructed",
                    index
                )));
            }
            match block {
                Block::Literal(bytes) => out.extend_from_slice(bytes),
                Block::Cabac(_) => out.extend_from_slice(&self.states[index].out),
                Block::SkipCoded { .. } => {}
            }
        }
        Ok(out)
    }

    /// The synthesized stream contents for the block at `read_index`.
    fn enter_read_block(&mut self, index: usize) -> Result<Vec<u8>> {
        match &self.envelope.blocks[index] {
            Block::Literal(bytes) => Ok(bytes.clone()),
            Block::Cabac(cabac) => {
                let size = cabac.size as usize;
                if size < SURROGATE_MARKER_BYTES {
                    return Err(Error::envelope(format!(
                        "CABAC block {} is {} bytes, shorter than a surrogate marker",
                        index, size
                    )));
                }
                let marker = surrogate_marker(self.marker_sequence);
                self.marker_sequence += 1;
                self.states[index].marker = Some(marker);
                Ok(make_surrogate_block(&marker, size))
            }
            // Skip-coded bytes travel in the neighbouring literal.
            Block::SkipCoded { .. } => Ok(Vec::new()),
        }
    }

    /// Advance the coded-block queue to the block this span init must
    /// correspond to, validating size and marker.
    fn recognize_coded_block(&mut self, data: &[u8]) -> Result<usize> {
        while self.next_coded_block < self.states.len() && !self.states[self.next_coded_block].coded
        {
            if self.next_coded_block >= self.read_index {
                return Err(Error::envelope(
                    "decoder opened a CABAC span the envelope does not record",
                ));
            }
            self.next_coded_block += 1;
        }
        if self.next_coded_block >= self.states.len() {
            return Err(Error::envelope(
                "decoder opened a CABAC span but the envelope block queue is exhausted",
            ));
        }
        let index = self.next_coded_block;
        self.next_coded_block += 1;

        match &self.envelope.blocks[index] {
            Block::Cabac(cabac) => {
                if cabac.size as usize != data.len() {
                    return Err(Error::envelope(format!(
                        "surrogate for block {} is {} bytes, decoder handed {}",
                        index,
                        cabac.size,
                        data.len()
                    )));
                }
                let expected = self.states[index].marker.ok_or_else(|| {
                    Error::envelope(format!("block {} was opened before its surrogate streamed", index))
                })?;
                if data[..SURROGATE_MARKER_BYTES] != expected {
                    return Err(Error::envelope(format!(
                        "surrogate marker mismatch at block {}: expected {:02x?}, got {:02x?}",
                        index,
                        expected,
                        &data[..SURROGATE_MARKER_BYTES]
                    )));
                }
            }
            Block::SkipCoded { size } => {
                if *size as usize != data.len() {
                    return Err(Error::envelope(format!(
                        "skip-coded block {} is {} bytes, decoder handed {}",
                        index,
                        size,
                        data.len()
                    )));
                }
            }
            Block::Literal(_) => {
                return Err(Error::envelope(format!(
                    "coded-block queue landed on literal block {}",
                    index
                )))
            }
        }
        Ok(index)
    }

    /// Decode the nonzero-count prefix that precedes a sub-block's map.
    fn read_nonzero_prefix(span: &mut SpanDecoder, model: &mut Model) -> u8 {
        let width = model.nonzero_prefix_width();
        let mut total = 0u8;
        let mut serialized = 0u32;
        for bit_index in 0..width {
            let weight = 1u8 << (width - 1 - bit_index);
            let key = model.nonzero_bit_key(bit_index, serialized, weight);
            let bit = span.ac.get(|range| model.probability_of_1(range, &key));
            model.update(key, bit);
            if bit {
                total |= weight;
            }
            serialized = (serialized << 1) | bit as u32;
        }
        total
    }

    fn span_mut(
        spans: &mut HashMap<SpanId, SpanDecoder>,
        span: SpanId,
    ) -> Result<&mut SpanDecoder> {
        spans
            .get_mut(&span)
            .ok_or_else(|| Error::recode(format!("unknown CABAC span handle {}", span)))
    }
}

impl CodingHooks for Decompressor {
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() && self.read_index < self.envelope.blocks.len() {
            if self.read_block.is_none() {
                let index = self.read_index;
                let block = self.enter_read_block(index)?;
                self.read_block = Some(block);
                self.read_offset = 0;
            }
            let remaining = {
                let block = self.read_block.as_ref().expect("just filled");
                if self.read_offset < block.len() {
                    let n = (block.len() - self.read_offset).min(buf.len() - written);
                    buf[written..written + n]
                        .copy_from_slice(&block[self.read_offset..self.read_offset + n]);
                    self.read_offset += n;
                    written += n;
                }
                block.len() - self.read_offset
            };
            if remaining == 0 {
                self.read_block = None;
                self.read_offset = 0;
                self.read_index += 1;
            }
        }
        Ok(written)
    }

    fn init_cabac(&mut self, data: &[u8]) -> Result<SpanDisposition> {
        let index = self.recognize_coded_block(data)?;
        match &self.envelope.blocks[index] {
            Block::Cabac(cabac) => {
                self.model.reset();
                let id = self.next_span_id;
                self.next_span_id += 1;
                self.spans.insert(
                    id,
                    SpanDecoder {
                        block_index: index,
                        ac: arith::Decoder::new(cabac.payload.clone()),
                        emit: CabacEmitter::new(),
                    },
                );
                Ok(SpanDisposition::Hooked(id))
            }
            _ => Ok(SpanDisposition::Native),
        }
    }

    fn cabac_get(&mut self, span: SpanId, ctx: CtxId, state: &mut u8) -> Result<bool> {
        let Decompressor { spans, model, .. } = self;
        let span = Self::span_mut(spans, span)?;
        let symbol = match model.coding_type() {
            CodingType::SignificanceMap => {
                if model.total_nonzeros().is_none() {
                    let total = Self::read_nonzero_prefix(span, model);
                    model.set_total_nonzeros(total);
                }
                let key = model.significance_key(model.zigzag_index(), model.nonzeros_observed());
                let symbol = span.ac.get(|range| model.probability_of_1(range, &key));
                model.update(key, symbol);
                model.observe_significance(symbol);
                symbol
            }
            CodingType::EndOfBlock => {
                // Computed, not coded: the total from the prefix pins it.
                let symbol = model.end_of_block_flag();
                model.observe_end_of_block(symbol);
                symbol
            }
            _ => {
                let key = ModelKey::plain(Context::Coded(ctx));
                let symbol = span.ac.get(|range| model.probability_of_1(range, &key));
                model.update(key, symbol);
                symbol
            }
        };
        span.emit.put(symbol, state);
        Ok(symbol)
    }

    fn cabac_get_bypass(&mut self, span: SpanId) -> Result<bool> {
        let Decompressor { spans, model, .. } = self;
        let span = Self::span_mut(spans, span)?;
        if matches!(
            model.coding_type(),
            CodingType::SignificanceMap | CodingType::EndOfBlock
        ) {
            return Err(Error::recode("bypass decision inside a significance map"));
        }
        let key = ModelKey::plain(Context::Bypass);
        let symbol = span.ac.get(|range| model.probability_of_1(range, &key));
        model.update(key, symbol);
        span.emit.put_bypass(symbol);
        Ok(symbol)
    }

    fn cabac_get_terminate(&mut self, span_id: SpanId) -> Result<bool> {
        let Decompressor {
            spans,
            model,
            states,
            envelope,
            ..
        } = self;
        let span = Self::span_mut(spans, span_id)?;
        let key = ModelKey::plain(Context::Terminate);
        let symbol = span.ac.get(|range| model.probability_of_1(range, &key));
        model.update(key, symbol);
        span.emit.put_terminate(symbol);
        if symbol {
            let cabac = match &envelope.blocks[span.block_index] {
                Block::Cabac(cabac) => cabac,
                _ => {
                    return Err(Error::recode(format!(
                        "span handle {} does not point at a CABAC block",
                        span_id
                    )))
                }
            };
            let emitter = std::mem::take(&mut span.emit);
            let mut bytes = emitter.into_bytes();

            // The original encoder may have dropped or kept the
            // stop-bit byte; the envelope's parity and last-byte fields
            // restore the exact tail.
            if bytes.last() == Some(&0x80) {
                bytes.pop();
            }
            if (bytes.len() % 2 == 1) != cabac.length_parity {
                bytes.push(0);
            }
            if let Some(last) = bytes.last_mut() {
                *last = cabac.last_byte;
            }
            if bytes.len() != cabac.size as usize {
                return Err(Error::recode(format!(
                    "reconstructed span for block {} is {} bytes, expected {}",
                    span.block_index,
                    bytes.len(),
                    cabac.size
                )));
            }
            let state = &mut states[span.block_index];
            state.out = bytes;
            state.done = true;
            debug!(block = span.block_index, "CABAC span reconstructed");
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
