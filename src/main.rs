//! recabac CLI - lossless H.264 recompression
//!
//! Four subcommands: compress, decompress, roundtrip, and a batch test
//! driver that roundtrips every file in a directory and writes a
//! metrics CSV.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use rayon::prelude::*;
use tracing::{info, warn};

use recabac::recode::{self, driver, Envelope};
use recabac::{init, Config};

#[derive(Parser)]
#[command(name = "recabac")]
#[command(about = "Lossless recompression of H.264/AVC CABAC bitstreams", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Number of threads for the batch driver
    #[arg(short = 't', long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompress a file into a recoded envelope
    Compress {
        /// Input file path
        input: PathBuf,

        /// Output file path (stdout if omitted)
        output: Option<PathBuf>,
    },

    /// Reconstruct the original file from a recoded envelope
    Decompress {
        /// Recoded envelope path
        input: PathBuf,

        /// Output file path (stdout if omitted)
        output: Option<PathBuf>,
    },

    /// Compress then decompress, verifying byte equality
    Roundtrip {
        /// Input file path
        input: PathBuf,

        /// Where to store the envelope once the roundtrip verifies
        output: Option<PathBuf>,
    },

    /// Roundtrip every file in a directory and write metrics.csv
    Test {
        /// Directory of input files
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init(Config {
        max_threads: cli.threads,
        verbose: cli.verbose,
        debug: cli.debug,
    })?;

    match cli.command {
        Commands::Compress { input, output } => cmd_compress(&input, output.as_deref())?,
        Commands::Decompress { input, output } => cmd_decompress(&input, output.as_deref())?,
        Commands::Roundtrip { input, output } => cmd_roundtrip(&input, output.as_deref())?,
        Commands::Test { dir } => cmd_test(&dir)?,
    }
    Ok(())
}

fn write_output(bytes: &[u8], output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => fs::write(path, bytes)?,
        None => std::io::stdout().write_all(bytes)?,
    }
    Ok(())
}

fn compress_file(input: &Path) -> recabac::Result<Envelope> {
    let original = fs::read(input)?;
    info!(
        input = %input.display(),
        bytes = original.len(),
        "compressing"
    );
    let mut decoder = driver::open_input(input)?;
    recode::compress(decoder.as_mut(), original)
}

fn decompress_envelope(input: &Path, envelope: Envelope) -> recabac::Result<Vec<u8>> {
    let mut decoder = driver::open_input(input)?;
    recode::decompress(decoder.as_mut(), envelope)
}

fn cmd_compress(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let envelope = compress_file(input)?;
    write_output(&envelope.to_bytes()?, output)?;
    Ok(())
}

fn cmd_decompress(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let envelope = Envelope::from_bytes(&fs::read(input)?)?;
    let bytes = decompress_envelope(input, envelope)?;
    write_output(&bytes, output)?;
    Ok(())
}

struct RoundtripReport {
    compressed: Vec<u8>,
    ratio: f64,
    overhead: f64,
    compress_ms: u128,
    decompress_ms: u128,
}

fn roundtrip(input: &Path) -> anyhow::Result<RoundtripReport> {
    let original = fs::read(input)?;

    let started = Instant::now();
    let envelope = compress_file(input)?;
    let compressed = envelope.to_bytes()?;
    let compress_ms = started.elapsed().as_millis();

    let started = Instant::now();
    let decompressed = decompress_envelope(input, envelope.clone())?;
    let decompress_ms = started.elapsed().as_millis();

    if decompressed != original {
        anyhow::bail!("compress-decompress roundtrip failed for {}", input.display());
    }

    let ratio = compressed.len() as f64 / original.len().max(1) as f64;
    let overhead =
        (compressed.len() - envelope.payload_bytes()) as f64 / compressed.len().max(1) as f64;
    Ok(RoundtripReport {
        compressed,
        ratio,
        overhead,
        compress_ms,
        decompress_ms,
    })
}

fn cmd_roundtrip(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let report = roundtrip(input)?;
    if let Some(path) = output {
        fs::write(path, &report.compressed)?;
    }
    println!("Compress-decompress roundtrip succeeded:");
    println!(" compression ratio: {:.2}%", report.ratio * 100.0);
    println!(" envelope overhead: {:.2}%", report.overhead * 100.0);
    Ok(())
}

struct TestRow {
    file: String,
    original_mb: f64,
    compressed_mb: f64,
    rate: f64,
    compress_ms: u128,
    decompress_ms: u128,
    failed: bool,
}

fn cmd_test(dir: &Path) -> anyhow::Result<()> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let output_dir = dir.join("output");
    fs::create_dir_all(&output_dir)?;

    let rows: Vec<TestRow> = files
        .par_iter()
        .map(|path| {
            let name = path.display().to_string();
            let original_mb = fs::metadata(path).map(|m| m.len()).unwrap_or(0) as f64 / 1_000_000.0;
            match roundtrip(path) {
                Ok(report) => {
                    let out_path = output_dir.join(path.file_name().unwrap_or_default());
                    if let Err(e) = fs::write(&out_path, &report.compressed) {
                        warn!(file = %name, error = %e, "failed to store envelope");
                    }
                    TestRow {
                        file: name,
                        original_mb,
                        compressed_mb: original_mb * report.ratio,
                        rate: report.ratio * 100.0,
                        compress_ms: report.compress_ms,
                        decompress_ms: report.decompress_ms,
                        failed: false,
                    }
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "roundtrip failed");
                    TestRow {
                        file: name,
                        original_mb,
                        compressed_mb: 0.0,
                        rate: 0.0,
                        compress_ms: 0,
                        decompress_ms: 0,
                        failed: true,
                    }
                }
            }
        })
        .collect();

    let mut csv = String::from(
        "File,Initial size (MB),Compressed size (MB),Compression rate (%),Space saving (%),\
         Total time (ms),Compression time (ms),Compression speed (MB/s),\
         Decompression time (ms),Decompression speed (MB/s)\n",
    );
    let mut failures = 0usize;
    for row in &rows {
        if row.failed {
            failures += 1;
            continue;
        }
        let compress_secs = (row.compress_ms as f64 / 1000.0).max(0.001);
        let decompress_secs = (row.decompress_ms as f64 / 1000.0).max(0.001);
        csv.push_str(&format!(
            "\"{}\",{:.3},{:.3},{:.2},{:.2},{},{},{:.2},{},{:.2}\n",
            row.file,
            row.original_mb,
            row.compressed_mb,
            row.rate,
            100.0 - row.rate,
            row.compress_ms + row.decompress_ms,
            row.compress_ms,
            row.original_mb / compress_secs,
            row.decompress_ms,
            row.original_mb / decompress_secs,
        ));
    }
    fs::write(output_dir.join("metrics.csv"), csv)?;

    if failures > 0 {
        anyhow::bail!(
            "compress-decompress roundtrip failed on {} / {} files",
            failures,
            rows.len()
        );
    }
    info!(files = rows.len(), "batch roundtrip complete");
    Ok(())
}
