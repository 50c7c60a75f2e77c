//! Recoded envelope container
//!
//! The envelope is an ordered sequence of blocks whose reconstructed
//! bytes, concatenated, equal the original file. Exactly one variant
//! applies per block: a literal byte run, a recoded CABAC span, or a
//! skip marker for a span that travels in the neighbouring literal.
//! Integers are little-endian on the wire.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"RCBC";
pub const FORMAT_VERSION: u8 = 1;

const TAG_LITERAL: u8 = 1;
const TAG_CABAC: u8 = 2;
const TAG_SKIP: u8 = 3;

/// A recoded CABAC span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabacBlock {
    /// Length of the original span in bytes.
    pub size: u32,
    /// Parity of the original span length; resolves the stop-bit
    /// padding ambiguity on reconstruction.
    pub length_parity: bool,
    /// Final byte of the original span.
    pub last_byte: u8,
    /// Arithmetic-coded restatement of the span's decisions.
    pub payload: Vec<u8>,
}

/// One envelope block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Bytes copied verbatim from the source.
    Literal(Vec<u8>),
    /// A recoded CABAC span.
    Cabac(CabacBlock),
    /// A CABAC span that could not be captured losslessly; its bytes
    /// travel in the following literal.
    SkipCoded { size: u32 },
}

/// The recoded file: an ordered block sequence.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub blocks: Vec<Block>,
}

impl Envelope {
    pub fn new() -> Self {
        Envelope { blocks: Vec::new() }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(self.blocks.len() as u32)?;
        for block in &self.blocks {
            match block {
                Block::Literal(bytes) => {
                    writer.write_u8(TAG_LITERAL)?;
                    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
                    writer.write_all(bytes)?;
                }
                Block::Cabac(cabac) => {
                    writer.write_u8(TAG_CABAC)?;
                    writer.write_u32::<LittleEndian>(cabac.size)?;
                    writer.write_u8(cabac.length_parity as u8)?;
                    writer.write_u8(cabac.last_byte)?;
                    writer.write_u32::<LittleEndian>(cabac.payload.len() as u32)?;
                    writer.write_all(&cabac.payload)?;
                }
                Block::SkipCoded { size } => {
                    writer.write_u8(TAG_SKIP)?;
                    writer.write_u32::<LittleEndian>(*size)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Envelope> {
        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::envelope("truncated header"))?;
        if magic != MAGIC {
            return Err(Error::envelope(format!(
                "bad magic {:02x?}, expected {:02x?}",
                magic, MAGIC
            )));
        }
        let version = reader.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(Error::envelope(format!(
                "unsupported envelope version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut blocks = Vec::new();
        for index in 0..count {
            let tag = reader
                .read_u8()
                .map_err(|_| Error::envelope(format!("truncated at block {}", index)))?;
            let block = match tag {
                TAG_LITERAL => {
                    let len = reader.read_u32::<LittleEndian>()? as usize;
                    let mut bytes = vec![0u8; len];
                    reader.read_exact(&mut bytes).map_err(|_| {
                        Error::envelope(format!("literal block {} truncated", index))
                    })?;
                    Block::Literal(bytes)
                }
                TAG_CABAC => {
                    let size = reader.read_u32::<LittleEndian>()?;
                    let length_parity = reader.read_u8()? != 0;
                    let last_byte = reader.read_u8()?;
                    let payload_len = reader.read_u32::<LittleEndian>()? as usize;
                    let mut payload = vec![0u8; payload_len];
                    reader.read_exact(&mut payload).map_err(|_| {
                        Error::envelope(format!("CABAC block {} truncated", index))
                    })?;
                    Block::Cabac(CabacBlock {
                        size,
                        length_parity,
                        last_byte,
                        payload,
                    })
                }
                TAG_SKIP => Block::SkipCoded {
                    size: reader.read_u32::<LittleEndian>()?,
                },
                other => {
                    return Err(Error::envelope(format!(
                        "unknown block tag {} at block {}",
                        other, index
                    )))
                }
            };
            blocks.push(block);
        }
        Ok(Envelope { blocks })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Envelope> {
        let mut cursor = std::io::Cursor::new(bytes);
        let envelope = Self::read_from(&mut cursor)?;
        Ok(envelope)
    }

    /// Total bytes carried as literal or recoded payload; the rest of
    /// the serialized size is container overhead.
    pub fn payload_bytes(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| match block {
                Block::Literal(bytes) => bytes.len(),
                Block::Cabac(cabac) => cabac.payload.len(),
                Block::SkipCoded { .. } => 0,
            })
            .sum()
    }
}
