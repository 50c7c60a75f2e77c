//! End-to-end recode engine tests: byte-exact roundtrips, splice
//! classification, surrogate validation, and the stop-bit fixups —
//! all driven through the scripted hooked decoder.

mod common;

use common::{generate_span, ScriptedDecoder, Segment, SpanOp};
use recabac::recode::driver::{CodingHooks, SpanDisposition};
use recabac::recode::{self, Block, Envelope};

fn annex_b_header() -> Vec<u8> {
    let mut header = vec![0, 0, 0, 1, 0x67];
    header.extend_from_slice(&[0x64, 0x00, 0x1E, 0xAC, 0xD9, 0x40]);
    header.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xEB, 0xE3, 0xCB]);
    header.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    header
}

/// A slice-like span: frame metadata, a few macroblocks of sub-block
/// maps, and a run of skewed bypass bits standing in for residual
/// levels. The top macroblock row uses 4x4 luma blocks plus the luma
/// DC; the bottom row codes its luma with the 8x8 transform. Every
/// macroblock carries a 4:2:2 chroma DC block, so each roundtrip
/// exercises all the sub-block geometries the walk distinguishes.
fn slice_span(frame_num: i32, bypass_bits: usize) -> Vec<SpanOp> {
    let mut ops = vec![SpanOp::FrameSpec {
        frame_num,
        mb_width: 2,
        mb_height: 2,
    }];
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        ops.push(SpanOp::MbXy { x, y });
        ops.push(SpanOp::Decision {
            ctx: 70,
            symbol: (x + y) % 2 == 0,
        });
        if y == 0 {
            ops.push(SpanOp::SubBlock {
                cat: 2,
                scan8_index: 0,
                max_coeff: 16,
                is_dc: false,
                chroma422: false,
                significant: vec![0, 1, 5],
            });
            ops.push(SpanOp::SubBlock {
                cat: 2,
                scan8_index: 1,
                max_coeff: 16,
                is_dc: false,
                chroma422: false,
                significant: vec![0],
            });
            ops.push(SpanOp::SubBlock {
                cat: 0,
                scan8_index: 48,
                max_coeff: 16,
                is_dc: true,
                chroma422: false,
                significant: vec![0, 2],
            });
        } else {
            ops.push(SpanOp::SubBlock {
                cat: 5,
                scan8_index: 0,
                max_coeff: 64,
                is_dc: false,
                chroma422: false,
                significant: vec![0, 3, 17],
            });
        }
        ops.push(SpanOp::SubBlock {
            cat: 7,
            scan8_index: 49,
            max_coeff: 8,
            is_dc: true,
            chroma422: true,
            significant: vec![1],
        });
        ops.push(SpanOp::TerminateZero);
    }
    for i in 0..bypass_bits {
        ops.push(SpanOp::Bypass {
            symbol: i % 37 == 0,
        });
    }
    ops
}

fn roundtrip(segments: Vec<Segment>) -> (Vec<u8>, Envelope, Vec<u8>) {
    let mut decoder = ScriptedDecoder::new(segments.clone());
    let original = decoder.file_bytes();
    let envelope = recode::compress(&mut decoder, original.clone()).expect("compress");

    let mut decoder = ScriptedDecoder::new(segments);
    let reconstructed = recode::decompress(&mut decoder, envelope.clone()).expect("decompress");
    (original, envelope, reconstructed)
}

#[test]
fn annex_b_like_stream_roundtrips_and_shrinks() {
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: slice_span(0, 8_000),
        },
        Segment::Raw(vec![0, 0, 0, 1, 0x0A]),
    ];
    let (original, envelope, reconstructed) = roundtrip(segments);

    assert_eq!(reconstructed, original);
    let serialized = envelope.to_bytes().unwrap();
    assert!(
        serialized.len() <= original.len(),
        "compressed {} bytes from {}",
        serialized.len(),
        original.len()
    );
}

#[test]
fn multiple_spans_keep_block_order() {
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: slice_span(0, 2_000),
        },
        Segment::Raw(vec![0, 0, 0, 1, 0x65, 0x88]),
        Segment::Span {
            ops: slice_span(1, 2_000),
        },
        Segment::Raw(vec![0x55; 6]),
    ];
    let (original, envelope, reconstructed) = roundtrip(segments);
    assert_eq!(reconstructed, original);

    let tags: Vec<u8> = envelope
        .blocks
        .iter()
        .map(|block| match block {
            Block::Literal(_) => b'L',
            Block::Cabac(_) => b'C',
            Block::SkipCoded { .. } => b'S',
        })
        .collect();
    assert_eq!(&tags, b"LCLCL");

    // The container itself survives serialization.
    let parsed = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed, envelope);
}

#[test]
fn escaped_span_is_skip_coded() {
    // A pure most-probable-symbol span is mostly zero bytes, so the
    // file carries it NAL-escaped and the decoder hands out different
    // bytes than the splice window contains.
    let escaped_ops: Vec<SpanOp> = (0..6_000)
        .map(|_| SpanOp::Decision {
            ctx: 9,
            symbol: false,
        })
        .collect();
    let unescaped_len = generate_span(&escaped_ops).len();

    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::EscapedSpan { ops: escaped_ops },
        Segment::Raw(vec![0, 0, 0, 1, 0x41]),
        Segment::Span {
            ops: slice_span(0, 1_500),
        },
    ];
    let (original, envelope, reconstructed) = roundtrip(segments);
    assert_eq!(reconstructed, original);

    let skip_sizes: Vec<u32> = envelope
        .blocks
        .iter()
        .filter_map(|block| match block {
            Block::SkipCoded { size } => Some(*size),
            _ => None,
        })
        .collect();
    assert_eq!(skip_sizes, vec![unescaped_len as u32]);

    // The skipped span's bytes travel inside a literal, so exactly one
    // recoded block remains.
    let cabac_blocks = envelope
        .blocks
        .iter()
        .filter(|block| matches!(block, Block::Cabac(_)))
        .count();
    assert_eq!(cabac_blocks, 1);
}

#[test]
fn short_span_is_skip_coded() {
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: vec![
                SpanOp::Decision {
                    ctx: 3,
                    symbol: true,
                },
                SpanOp::Decision {
                    ctx: 3,
                    symbol: false,
                },
            ],
        },
        Segment::Raw(vec![0x20; 4]),
    ];
    let mut decoder = ScriptedDecoder::new(segments.clone());
    let original = decoder.file_bytes();

    let envelope = recode::compress(&mut decoder, original.clone()).unwrap();
    assert!(envelope
        .blocks
        .iter()
        .any(|block| matches!(block, Block::SkipCoded { .. })));

    let mut decoder = ScriptedDecoder::new(segments);
    assert_eq!(recode::decompress(&mut decoder, envelope).unwrap(), original);
}

#[test]
fn previous_frame_metadata_survives_rotation() {
    // Two frames with the same macroblock dimensions but different
    // frame numbers: the second frame's nonzero-count prediction reads
    // the records written during the first.
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: slice_span(0, 1_000),
        },
        Segment::Raw(vec![0, 0, 0, 1, 0x41]),
        Segment::Span {
            ops: slice_span(1, 1_000),
        },
    ];
    let (original, _, reconstructed) = roundtrip(segments);
    assert_eq!(reconstructed, original);
}

#[test]
fn kept_stop_bit_padding_is_restored() {
    // A span whose encoder kept the padding byte: odd length, trailing
    // 0x80. Reconstruction must re-grow the tail from the parity and
    // last-byte fields.
    let (ops, mut file_bytes) = (600..650usize)
        .map(|bits| {
            let ops = slice_span(0, bits);
            let bytes = generate_span(&ops);
            (ops, bytes)
        })
        .find(|(_, bytes)| bytes.last() != Some(&0x80))
        .expect("some script tail avoids the stop byte");
    assert_eq!(file_bytes.len() % 2, 0);
    file_bytes.push(0x80);

    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::SpanWithFileBytes {
            ops,
            file_bytes: file_bytes.clone(),
        },
        Segment::Raw(vec![0x33; 5]),
    ];
    let (original, envelope, reconstructed) = roundtrip(segments);
    assert_eq!(reconstructed, original);

    let cabac = envelope
        .blocks
        .iter()
        .find_map(|block| match block {
            Block::Cabac(cabac) => Some(cabac),
            _ => None,
        })
        .expect("one recoded block");
    assert_eq!(cabac.size as usize, file_bytes.len());
    assert!(cabac.length_parity);
    assert_eq!(cabac.last_byte, 0x80);
}

#[test]
fn compression_is_deterministic() {
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: slice_span(0, 3_000),
        },
    ];
    let mut first = ScriptedDecoder::new(segments.clone());
    let original = first.file_bytes();
    let a = recode::compress(&mut first, original.clone()).unwrap();
    let mut second = ScriptedDecoder::new(segments);
    let b = recode::compress(&mut second, original).unwrap();
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}

#[test]
fn surrogate_marker_mismatch_is_fatal() {
    let envelope = Envelope {
        blocks: vec![Block::Cabac(recabac::recode::CabacBlock {
            size: 16,
            length_parity: false,
            last_byte: 0,
            payload: Vec::new(),
        })],
    };

    // Stream the surrogate, then claim a span with a corrupted marker.
    let mut engine = recode::Decompressor::new(envelope.clone());
    let mut buf = [0u8; 64];
    let n = engine.read_packet(&mut buf).unwrap();
    assert_eq!(n, 16);

    let mut tampered = buf[..16].to_vec();
    tampered[0] ^= 0xFF;
    let err = engine.init_cabac(&tampered).unwrap_err();
    assert!(err.to_string().contains("marker"), "got: {}", err);

    // The untampered surrogate is accepted.
    let mut engine = recode::Decompressor::new(envelope);
    let n = engine.read_packet(&mut buf).unwrap();
    assert_eq!(n, 16);
    assert!(matches!(
        engine.init_cabac(&buf[..16]).unwrap(),
        SpanDisposition::Hooked(_)
    ));
}

#[test]
fn missing_block_aborts_decompression() {
    let segments = vec![
        Segment::Raw(annex_b_header()),
        Segment::Span {
            ops: slice_span(0, 1_000),
        },
        Segment::Raw(vec![0, 0, 0, 1, 0x41]),
        Segment::Span {
            ops: slice_span(1, 1_000),
        },
    ];
    let mut decoder = ScriptedDecoder::new(segments.clone());
    let original = decoder.file_bytes();
    let mut envelope = recode::compress(&mut decoder, original).unwrap();

    // Drop the last recoded block; the decoder will still open a span
    // for it.
    let last_cabac = envelope
        .blocks
        .iter()
        .rposition(|block| matches!(block, Block::Cabac(_)))
        .unwrap();
    envelope.blocks.remove(last_cabac);

    let mut decoder = ScriptedDecoder::new(segments);
    assert!(recode::decompress(&mut decoder, envelope).is_err());
}
