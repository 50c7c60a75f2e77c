//! recabac - lossless recompression of H.264/AVC CABAC bitstreams
//!
//! Given an H.264 file, recabac produces a smaller file from which the
//! original bytes are reconstructed exactly. The gain comes from
//! re-coding the standard's CABAC spans under a better probability
//! model; everything else in the file travels as raw literals.
//!
//! # Architecture
//!
//! - `coder`: the generic binary arithmetic coder and the standard
//!   CABAC decoder / bit-exact re-encoder
//! - `model`: context keying, probability estimation, and the state
//!   tracking of the CABAC decode walk
//! - `recode`: the splice protocol, the envelope container, and the
//!   compress/decompress engines behind the hooked-decoder ABI
//!
//! The H.264 parser itself is an external collaborator: a modified
//! decoder that routes its reads and CABAC decisions through the
//! [`recode::driver::CodingHooks`] trait. The engines are strictly
//! single-threaded; parallelism only appears file-by-file in the batch
//! driver.

pub mod coder;
pub mod error;
pub mod model;
pub mod recode;

pub use error::{Error, Result};

/// recabac version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the recabac library
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of threads for the batch roundtrip driver. The
    /// recode core itself always runs single-threaded.
    pub max_threads: Option<usize>,
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_threads: None,
            verbose: false,
            debug: false,
        }
    }
}

/// Initialize the recabac library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if let Some(threads) = config.max_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| Error::usage(format!("Failed to initialize thread pool: {}", e)))?;
    }

    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt().with_env_filter(level).init();
    }

    Ok(())
}
