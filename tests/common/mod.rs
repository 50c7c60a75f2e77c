//! Common test utilities for recabac integration tests
//!
//! The centerpiece is [`ScriptedDecoder`], a hooked decoder that stands
//! in for the modified H.264 decoder: it traverses a synthetic file
//! whose CABAC spans were generated from a symbol script, and drives
//! the engine hooks exactly the way the real decoder binding would —
//! on both the compress and decompress paths.

use recabac::coder::cabac::{CabacDecoder, CabacEmitter};
use recabac::error::Result;
use recabac::model::CodingType;
use recabac::recode::driver::{CodingHooks, CtxId, HookedDecoder, SpanDisposition, SpanId};

/// Size of the scripted decoder's context-state array.
pub const STATE_COUNT: usize = 0x400;

fn sig_ctx(index: u8) -> CtxId {
    0x100 + index as CtxId
}

fn eob_ctx(index: u8) -> CtxId {
    0x180 + index as CtxId
}

/// One scripted event inside a CABAC span.
#[derive(Clone)]
pub enum SpanOp {
    /// A context-coded decision with its intended value.
    Decision { ctx: CtxId, symbol: bool },
    /// A bypass-coded decision with its intended value.
    Bypass { symbol: bool },
    /// Frame header announcement.
    FrameSpec {
        frame_num: i32,
        mb_width: u32,
        mb_height: u32,
    },
    /// Macroblock position announcement.
    MbXy { x: u32, y: u32 },
    /// A full sub-block significance map. `significant` lists the
    /// zigzag indices of nonzero coefficients; an empty list leaves
    /// only the implicit final coefficient.
    SubBlock {
        cat: u8,
        scan8_index: u8,
        max_coeff: u8,
        is_dc: bool,
        chroma422: bool,
        significant: Vec<u8>,
    },
    /// A non-final end-of-slice check.
    TerminateZero,
}

/// One segment of the synthetic file.
#[derive(Clone)]
pub enum Segment {
    /// Bytes outside any CABAC span (headers, start codes, ...).
    Raw(Vec<u8>),
    /// A CABAC span generated from `ops` (a final terminate is
    /// appended automatically).
    Span { ops: Vec<SpanOp> },
    /// A span whose file bytes carry start-code-emulation escapes, so
    /// the decoder hands out different bytes than the file contains.
    EscapedSpan { ops: Vec<SpanOp> },
    /// A raw span appended to the decoder's file bytes verbatim; used
    /// for spans whose file form differs from the generated form
    /// (e.g. a kept stop-bit padding byte).
    SpanWithFileBytes { ops: Vec<SpanOp>, file_bytes: Vec<u8> },
}

enum Piece {
    Raw(Vec<u8>),
    Span {
        /// Bytes as they appear in the file / read stream.
        file_len: usize,
        /// Bytes the decoder hands to `init_cabac` (unescaped form).
        payload_len: usize,
        escaped: bool,
        ops: Vec<SpanOp>,
    },
}

/// Generate the exact CABAC bytes for a span script.
pub fn generate_span(ops: &[SpanOp]) -> Vec<u8> {
    let mut emitter = CabacEmitter::new();
    let mut states = [0u8; STATE_COUNT];
    for op in ops {
        match op {
            SpanOp::Decision { ctx, symbol } => {
                emitter.put(*symbol, &mut states[*ctx as usize]);
            }
            SpanOp::Bypass { symbol } => emitter.put_bypass(*symbol),
            SpanOp::FrameSpec { .. } | SpanOp::MbXy { .. } => {}
            SpanOp::SubBlock {
                max_coeff,
                significant,
                ..
            } => {
                let mut index = 0u8;
                while index + 1 < *max_coeff {
                    let sig = significant.contains(&index);
                    emitter.put(sig, &mut states[sig_ctx(index) as usize]);
                    if sig {
                        let last = significant.iter().all(|&z| z <= index);
                        emitter.put(last, &mut states[eob_ctx(index) as usize]);
                        if last {
                            break;
                        }
                    }
                    index += 1;
                }
            }
            SpanOp::TerminateZero => emitter.put_terminate(false),
        }
    }
    emitter.put_terminate(true);
    emitter.into_bytes()
}

/// Insert a 0x03 escape byte after every pair of zero bytes.
pub fn escape_nal(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut zeros = 0;
    for &byte in bytes {
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        if zeros == 2 {
            out.push(3);
            zeros = 0;
        }
    }
    out
}

fn unescape_nal(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut zeros = 0;
    for &byte in bytes {
        if zeros == 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// A hooked decoder that replays a fixed traversal script.
///
/// The same instance drives both directions: the engine's disposition
/// decides per span whether decisions flow through the hooks or the
/// span is decoded natively from the handed-out bytes.
pub struct ScriptedDecoder {
    pieces: Vec<Piece>,
    file: Vec<u8>,
}

impl ScriptedDecoder {
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut pieces = Vec::new();
        let mut file = Vec::new();
        for segment in segments {
            match segment {
                Segment::Raw(bytes) => {
                    file.extend_from_slice(&bytes);
                    pieces.push(Piece::Raw(bytes));
                }
                Segment::Span { ops } => {
                    let payload = generate_span(&ops);
                    file.extend_from_slice(&payload);
                    pieces.push(Piece::Span {
                        file_len: payload.len(),
                        payload_len: payload.len(),
                        escaped: false,
                        ops,
                    });
                }
                Segment::EscapedSpan { ops } => {
                    let payload = generate_span(&ops);
                    let escaped = escape_nal(&payload);
                    assert_ne!(
                        escaped.len(),
                        payload.len(),
                        "escaped span script produced no 00 00 runs"
                    );
                    file.extend_from_slice(&escaped);
                    pieces.push(Piece::Span {
                        file_len: escaped.len(),
                        payload_len: payload.len(),
                        escaped: true,
                        ops,
                    });
                }
                Segment::SpanWithFileBytes { ops, file_bytes } => {
                    file.extend_from_slice(&file_bytes);
                    pieces.push(Piece::Span {
                        file_len: file_bytes.len(),
                        payload_len: file_bytes.len(),
                        escaped: false,
                        ops,
                    });
                }
            }
        }
        ScriptedDecoder { pieces, file }
    }

    /// The synthetic original file.
    pub fn file_bytes(&self) -> Vec<u8> {
        self.file.clone()
    }
}

fn drive_hooked(hooks: &mut dyn CodingHooks, span: SpanId, ops: &[SpanOp]) -> Result<()> {
    let mut states = [0u8; STATE_COUNT];
    for op in ops {
        match op {
            SpanOp::Decision { ctx, symbol } => {
                let got = hooks.cabac_get(span, *ctx, &mut states[*ctx as usize])?;
                assert_eq!(got, *symbol, "decision mismatch");
            }
            SpanOp::Bypass { symbol } => {
                let got = hooks.cabac_get_bypass(span)?;
                assert_eq!(got, *symbol, "bypass mismatch");
            }
            SpanOp::FrameSpec {
                frame_num,
                mb_width,
                mb_height,
            } => hooks.frame_spec(*frame_num, *mb_width, *mb_height),
            SpanOp::MbXy { x, y } => hooks.mb_xy(*x, *y),
            SpanOp::SubBlock {
                cat,
                scan8_index,
                max_coeff,
                is_dc,
                chroma422,
                significant,
            } => {
                hooks.begin_sub_mb(*cat, *scan8_index, *max_coeff, *is_dc, *chroma422);
                hooks.begin_coding_type(CodingType::SignificanceMap, 0, 0, 0);
                let mut index = 0u8;
                while index + 1 < *max_coeff {
                    let sig =
                        hooks.cabac_get(span, sig_ctx(index), &mut states[sig_ctx(index) as usize])?;
                    assert_eq!(sig, significant.contains(&index), "significance mismatch");
                    if sig {
                        let last = hooks.cabac_get(
                            span,
                            eob_ctx(index),
                            &mut states[eob_ctx(index) as usize],
                        )?;
                        assert_eq!(
                            last,
                            significant.iter().all(|&z| z <= index),
                            "end-of-block mismatch"
                        );
                        if last {
                            break;
                        }
                    }
                    index += 1;
                }
                hooks.end_coding_type(CodingType::SignificanceMap);
                hooks.end_sub_mb();
            }
            SpanOp::TerminateZero => {
                let got = hooks.cabac_get_terminate(span)?;
                assert!(!got, "premature end of span");
            }
        }
    }
    let done = hooks.cabac_get_terminate(span)?;
    assert!(done, "span did not terminate");
    Ok(())
}

/// A skip-coded span: decode it from the handed-out bytes without
/// touching the hooks, the way the real decoder falls back to its own
/// CABAC machinery.
fn decode_native(payload: &[u8], ops: &[SpanOp]) {
    let mut decoder = CabacDecoder::new(payload.to_vec());
    let mut states = [0u8; STATE_COUNT];
    for op in ops {
        match op {
            SpanOp::Decision { ctx, symbol } => {
                let got = decoder.decision(&mut states[*ctx as usize]);
                assert_eq!(got, *symbol, "native decision mismatch");
            }
            SpanOp::Bypass { symbol } => {
                assert_eq!(decoder.bypass(), *symbol, "native bypass mismatch");
            }
            SpanOp::FrameSpec { .. } | SpanOp::MbXy { .. } => {}
            SpanOp::SubBlock {
                max_coeff,
                significant,
                ..
            } => {
                let mut index = 0u8;
                while index + 1 < *max_coeff {
                    let sig = decoder.decision(&mut states[sig_ctx(index) as usize]);
                    assert_eq!(sig, significant.contains(&index));
                    if sig {
                        let last = decoder.decision(&mut states[eob_ctx(index) as usize]);
                        if last {
                            break;
                        }
                    }
                    index += 1;
                }
            }
            SpanOp::TerminateZero => {
                assert!(!decoder.terminate());
            }
        }
    }
    assert!(decoder.terminate(), "native span did not terminate");
}

impl HookedDecoder for ScriptedDecoder {
    fn decode_video(&mut self, hooks: &mut dyn CodingHooks) -> Result<()> {
        // Pull the whole stream through read_packet, like a buffered
        // demuxer would.
        let mut stream = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = hooks.read_packet(&mut buf)?;
            if n == 0 {
                break;
            }
            stream.extend_from_slice(&buf[..n]);
        }

        let mut offset = 0usize;
        for piece in &self.pieces {
            match piece {
                Piece::Raw(bytes) => offset += bytes.len(),
                Piece::Span {
                    file_len,
                    payload_len,
                    escaped,
                    ops,
                } => {
                    if offset + file_len > stream.len() {
                        return Err(recabac::error::Error::decoder(
                            "scripted stream ended mid-span",
                        ));
                    }
                    let slice = &stream[offset..offset + file_len];
                    let payload = if *escaped {
                        unescape_nal(slice)
                    } else {
                        slice.to_vec()
                    };
                    assert_eq!(payload.len(), *payload_len);
                    match hooks.init_cabac(&payload)? {
                        SpanDisposition::Hooked(span) => drive_hooked(hooks, span, ops)?,
                        SpanDisposition::Native => decode_native(&payload, ops),
                    }
                    offset += file_len;
                }
            }
        }
        Ok(())
    }
}
