//! Hooked decoder ABI
//!
//! The engines never parse H.264 themselves. A modified decoder walks
//! the bitstream and reports every CABAC decision and every piece of
//! residual metadata through the [`CodingHooks`] trait; the engines
//! implement it on the compress and decompress sides. The decoder side
//! of the contract is [`HookedDecoder`]: anything that can traverse an
//! H.264 stream while routing reads and CABAC decisions through the
//! hooks.
//!
//! CABAC spans are identified by numeric handles scoped to one
//! `decode_video` call; no pointers cross the boundary.

use std::path::Path;

use crate::error::{Error, Result};
use crate::model::CodingType;

pub use crate::model::CtxId;

/// Handle for one CABAC span, assigned by the engine at span init.
pub type SpanId = u64;

/// How the engine wants a CABAC span handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanDisposition {
    /// Route every decision of this span through the hooks, quoting the
    /// returned handle.
    Hooked(SpanId),
    /// Decode this span natively and do not call the CABAC hooks for it.
    Native,
}

/// The hook surface the engines expose to the hooked decoder.
///
/// All calls are synchronous; each returns before the decoder issues
/// the next one. The model hooks mirror the decoder's walk through
/// frames, macroblocks and sub-blocks and carry no return value.
pub trait CodingHooks {
    /// Hand the decoder its next slice of input. Returns the number of
    /// bytes written; 0 means end of stream.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// A CABAC span begins. `data` is the span exactly as the decoder
    /// sees it.
    fn init_cabac(&mut self, data: &[u8]) -> Result<SpanDisposition>;

    /// One context-coded decision. `state` is the decoder's context
    /// state byte; `ctx` is its ordinal in the state array.
    fn cabac_get(&mut self, span: SpanId, ctx: CtxId, state: &mut u8) -> Result<bool>;

    /// One bypass-coded decision.
    fn cabac_get_bypass(&mut self, span: SpanId) -> Result<bool>;

    /// One end-of-slice decision. `true` closes the span.
    fn cabac_get_terminate(&mut self, span: SpanId) -> Result<bool>;

    /// Raw byte skipping inside a span is not part of the recode
    /// contract.
    fn skip_bytes(&mut self, _span: SpanId, _count: usize) -> Result<()> {
        Err(Error::unsupported("CABAC skip_bytes hook is not used"))
    }

    /// Frame header: frame number and dimensions in macroblocks.
    fn frame_spec(&mut self, frame_num: i32, mb_width: u32, mb_height: u32);

    /// The walk entered macroblock `(x, y)`.
    fn mb_xy(&mut self, x: u32, y: u32);

    /// A sub-block's residual coding begins.
    fn begin_sub_mb(&mut self, cat: u8, scan8_index: u8, max_coeff: u8, is_dc: bool, chroma422: bool);

    /// The current sub-block's residual coding ended.
    fn end_sub_mb(&mut self);

    /// The decoder entered a keyed stretch of decisions.
    fn begin_coding_type(
        &mut self,
        coding_type: CodingType,
        zigzag_index: u8,
        param0: u32,
        param1: u32,
    );

    /// The keyed stretch ended.
    fn end_coding_type(&mut self, coding_type: CodingType);
}

/// A decoder that traverses one input and drives the hooks.
///
/// Implementations must be single-threaded and must route every byte of
/// input through `read_packet`.
pub trait HookedDecoder {
    fn decode_video(&mut self, hooks: &mut dyn CodingHooks) -> Result<()>;
}

/// Open the hooked decoder backend for `path`.
///
/// The decoder is an external collaborator; this crate ships the trait
/// and the engines. A build that links a backend registers it here.
pub fn open_input(path: &Path) -> Result<Box<dyn HookedDecoder>> {
    Err(Error::unsupported(format!(
        "no hooked H.264 decoder backend is linked into this build \
         (cannot traverse {})",
        path.display()
    )))
}
