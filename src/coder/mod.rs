//! Entropy coding primitives
//!
//! - `arith`: the generic fixed-point binary arithmetic coder both
//!   recode directions are built on.
//! - `cabac`: the standard H.264 binary arithmetic code — tables, a
//!   conformant decoder, and the bit-exact re-encoder.

pub mod arith;
pub mod cabac;

pub use arith::{Decoder as ArithDecoder, Encoder as ArithEncoder};
pub use cabac::{CabacDecoder, CabacEmitter};
