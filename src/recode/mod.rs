//! The recode pipeline
//!
//! Splits an H.264 file into literal spans and CABAC spans, restates
//! each CABAC span under the predictive model, and reassembles the
//! original bytes exactly on the way back.

pub mod compress;
pub mod decompress;
pub mod driver;
pub mod envelope;
pub mod splice;

pub use compress::Compressor;
pub use decompress::Decompressor;
pub use driver::{CodingHooks, HookedDecoder, SpanDisposition, SpanId};
pub use envelope::{Block, CabacBlock, Envelope};

use crate::error::Result;

/// Compress `original` by driving `decoder` over it.
pub fn compress(decoder: &mut dyn HookedDecoder, original: Vec<u8>) -> Result<Envelope> {
    Compressor::new(original).run(decoder)
}

/// Reconstruct the original bytes of `envelope` by driving `decoder`
/// over the synthesized stream.
pub fn decompress(decoder: &mut dyn HookedDecoder, envelope: Envelope) -> Result<Vec<u8>> {
    Decompressor::new(envelope).run(decoder)
}
