//! Binary record codec.
//!
//! Every record is written as a self-describing frame:
//!
//! ```text
//! frame  := type:u32 body_len:u32 body
//! header := run:u32 event:u32 flags:u32 ntags:u32 (key:str value:str)*
//! str    := len:u32 bytes       (UTF-8)
//! bytes  := len:u32 bytes
//! _RAW   := header subtype:str nblocks:u32 (id:u32 bytes)*
//! _DRB   := header nboards:u32 (id:u32 bytes)*
//! _DET   := header nrecords:u32 frame*
//! ```
//!
//! All integers are little-endian. Decoding resolves the leading type code
//! through a [`CodecRegistry`], so the caller never needs to know which shape
//! is stored. Frames nest at most [`MAX_NESTING`] levels below the outermost
//! one.

use crate::record::{
    Block, BoardRecord, DetectorRecord, RawBlockRecord, Record, RecordHeader, RecordType,
};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use thiserror::Error;

/// Size of the frame prefix (type code and body length).
pub const FRAME_HEADER_SIZE: usize = 8;
/// Deepest accepted frame nesting below the outermost frame.
pub const MAX_NESTING: usize = 16;
/// Largest frame body a stream reader will buffer.
pub const MAX_FRAME_SIZE: usize = 1 << 28;

/// Errors that can occur while encoding or decoding records.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown record type {0}")]
    UnknownType(RecordType),

    #[error("Truncated record: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("{0} unexpected trailing bytes after record")]
    TrailingBytes(usize),

    #[error("Invalid string in record: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    #[error("Records nested deeper than {limit} levels")]
    TooDeeplyNested { limit: usize },

    #[error("{what} of {len} exceeds the limit of {limit}")]
    TooLarge {
        what: &'static str,
        len: usize,
        limit: usize,
    },
}

/// Reconstructs one record shape from its header and remaining body.
pub type ReadFn = fn(RecordHeader, &mut BodyReader<'_>, &CodecRegistry) -> Result<Record, CodecError>;

/// Maps record type codes to reconstruction functions.
#[derive(Clone)]
pub struct CodecRegistry {
    readers: HashMap<RecordType, ReadFn>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.readers.keys().map(|t| t.to_string()).collect();
        types.sort();
        f.debug_struct("CodecRegistry").field("types", &types).finish()
    }
}

impl CodecRegistry {
    /// Creates a registry that knows no record types.
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Creates a registry with every built-in record shape.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(RecordType::RAW, read_raw);
        registry.register(RecordType::BOARD, read_board);
        registry.register(RecordType::DETECTOR, read_detector);
        registry
    }

    /// Registers (or replaces) the reader for `record_type`.
    pub fn register(&mut self, record_type: RecordType, reader: ReadFn) -> Option<ReadFn> {
        self.readers.insert(record_type, reader)
    }

    pub fn contains(&self, record_type: RecordType) -> bool {
        self.readers.contains_key(&record_type)
    }

    /// Decodes exactly one frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, CodecError> {
        let mut reader = BodyReader::new(bytes);
        let record = self.read_frame(&mut reader, 0)?;
        reader.finish()?;
        Ok(record)
    }

    /// Decodes a frame body whose prefix has already been consumed.
    pub fn decode_body(&self, record_type: RecordType, body: &[u8]) -> Result<Record, CodecError> {
        self.decode_nested(record_type, body, 0)
    }

    /// Reads the next frame of `reader` as a record nested `depth` levels
    /// deep.
    pub fn read_frame(&self, reader: &mut BodyReader<'_>, depth: usize) -> Result<Record, CodecError> {
        if depth > MAX_NESTING {
            return Err(CodecError::TooDeeplyNested { limit: MAX_NESTING });
        }
        let record_type = RecordType(reader.u32()?);
        let len = reader.u32()? as usize;
        let body = reader.take(len)?;
        self.decode_nested(record_type, body, depth)
    }

    fn decode_nested(
        &self,
        record_type: RecordType,
        body: &[u8],
        depth: usize,
    ) -> Result<Record, CodecError> {
        let reader_fn = self
            .readers
            .get(&record_type)
            .ok_or(CodecError::UnknownType(record_type))?;
        let mut reader = BodyReader::nested(body, depth);
        let header = read_header(&mut reader)?;
        let record = reader_fn(header, &mut reader, self)?;
        reader.finish()?;
        Ok(record)
    }
}

/// Parses the frame prefix, returning the type code and body length.
pub fn parse_frame_header(prefix: &[u8; FRAME_HEADER_SIZE]) -> (RecordType, usize) {
    let record_type = RecordType(LittleEndian::read_u32(&prefix[0..4]));
    let len = LittleEndian::read_u32(&prefix[4..8]) as usize;
    (record_type, len)
}

/// Encodes a record as one frame.
pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut writer = BodyWriter::default();
    write_frame(&mut writer, record)?;
    Ok(writer.into_inner())
}

fn write_frame(out: &mut BodyWriter, record: &Record) -> Result<(), CodecError> {
    let mut body = BodyWriter::default();
    write_header(&mut body, record.header())?;
    match record {
        Record::Raw(raw) => {
            body.str(&raw.subtype)?;
            write_blocks(&mut body, &raw.blocks)?;
        }
        Record::Board(board) => write_blocks(&mut body, &board.boards)?,
        Record::Detector(detector) => {
            body.u32(wire_len(detector.records.len(), "record count")?);
            for sub in &detector.records {
                write_frame(&mut body, sub)?;
            }
        }
    }
    let body = body.into_inner();
    out.u32(record.record_type().0);
    out.bytes(&body)
}

fn write_header(out: &mut BodyWriter, header: &RecordHeader) -> Result<(), CodecError> {
    out.u32(header.run_number);
    out.u32(header.event_number);
    out.u32(header.flags());
    out.u32(wire_len(header.tags.len(), "tag count")?);
    for (key, value) in header.tags.iter() {
        out.str(key)?;
        out.str(value)?;
    }
    Ok(())
}

fn write_blocks(out: &mut BodyWriter, blocks: &[Block]) -> Result<(), CodecError> {
    out.u32(wire_len(blocks.len(), "block count")?);
    for block in blocks {
        out.u32(block.id);
        out.bytes(&block.data)?;
    }
    Ok(())
}

/// Converts a count or length to its 32-bit wire form.
fn wire_len(len: usize, what: &'static str) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge {
        what,
        len,
        limit: u32::MAX as usize,
    })
}

fn read_header(reader: &mut BodyReader<'_>) -> Result<RecordHeader, CodecError> {
    let run_number = reader.u32()?;
    let event_number = reader.u32()?;
    let flags = reader.u32()?;
    let mut header = RecordHeader::with_flags(run_number, event_number, flags);
    let ntags = reader.u32()?;
    for _ in 0..ntags {
        let key = reader.string()?;
        let value = reader.string()?;
        header.tags.set(key, value);
    }
    Ok(header)
}

fn read_blocks(reader: &mut BodyReader<'_>) -> Result<Vec<Block>, CodecError> {
    let count = reader.u32()?;
    // capacity bounded by what the body can actually hold
    let mut blocks = Vec::with_capacity((count as usize).min(reader.remaining() / 8));
    for _ in 0..count {
        let id = reader.u32()?;
        let data = reader.bytes()?.to_vec();
        blocks.push(Block { id, data });
    }
    Ok(blocks)
}

fn read_raw(
    header: RecordHeader,
    reader: &mut BodyReader<'_>,
    _registry: &CodecRegistry,
) -> Result<Record, CodecError> {
    let subtype = reader.string()?;
    let blocks = read_blocks(reader)?;
    Ok(Record::Raw(RawBlockRecord {
        header,
        subtype,
        blocks,
    }))
}

fn read_board(
    header: RecordHeader,
    reader: &mut BodyReader<'_>,
    _registry: &CodecRegistry,
) -> Result<Record, CodecError> {
    let boards = read_blocks(reader)?;
    Ok(Record::Board(BoardRecord { header, boards }))
}

fn read_detector(
    header: RecordHeader,
    reader: &mut BodyReader<'_>,
    registry: &CodecRegistry,
) -> Result<Record, CodecError> {
    let count = reader.u32()?;
    let depth = reader.depth() + 1;
    let mut records = Vec::new();
    for _ in 0..count {
        records.push(registry.read_frame(reader, depth)?);
    }
    Ok(Record::Detector(DetectorRecord { header, records }))
}

/// Bounds-checked little-endian reader over a frame body.
pub struct BodyReader<'a> {
    buf: &'a [u8],
    depth: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::nested(buf, 0)
    }

    fn nested(buf: &'a [u8], depth: usize) -> Self {
        Self { buf, depth }
    }

    /// Nesting level of the frame this body belongs to.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        Ok(String::from_utf8(self.bytes()?.to_vec())?)
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// Little-endian writer that grows an owned buffer.
#[derive(Default)]
struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    fn u32(&mut self, value: u32) {
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, value);
        self.buf.extend_from_slice(&word);
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        self.u32(wire_len(data.len(), "byte field")?);
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn str(&mut self, s: &str) -> Result<(), CodecError> {
        self.bytes(s.as_bytes())
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
