//! Tagged record model.
//!
//! Every producer emits records that share a common header (run number,
//! event number, begin/end-of-run flags and a string tag store). The concrete
//! shapes differ only in their payload: raw data blocks, legacy per-board
//! composites, or a detector record bundling the sub-records of one trigger.

use std::fmt::{self, Display};
use std::str::FromStr;

/// Four-character record type code packed into a `u32`.
///
/// The first character occupies the least significant byte, so `"_RAW"`
/// serializes to the bytes `_`, `R`, `A`, `W` in a little-endian stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordType(pub u32);

impl RecordType {
    /// Generic raw data record (`_RAW`).
    pub const RAW: Self = Self::from_code(*b"_RAW");
    /// Legacy per-board composite record (`_DRB`).
    pub const BOARD: Self = Self::from_code(*b"_DRB");
    /// Detector record bundling sub-records of one trigger (`_DET`).
    pub const DETECTOR: Self = Self::from_code(*b"_DET");

    /// Packs a four-character code.
    pub const fn from_code(code: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(code))
    }

    /// Returns the four-character code.
    pub fn code(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.code() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

/// Ordered string-to-string tag store.
///
/// Insertion order is preserved; setting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    entries: Vec<(String, String)>,
}

impl Tags {
    /// Creates an empty tag store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw string stored under `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parses the value stored under `key`, falling back to `default` when the
    /// key is absent or the value does not parse.
    pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.tag(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Stores `value` under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Display) {
        let key = key.into();
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const FLAG_BORE: u32 = 0x1;
const FLAG_EORE: u32 = 0x2;

/// Header fields shared by all record shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub run_number: u32,
    pub event_number: u32,
    flags: u32,
    pub tags: Tags,
}

impl RecordHeader {
    pub fn new(run_number: u32, event_number: u32) -> Self {
        Self {
            run_number,
            event_number,
            flags: 0,
            tags: Tags::new(),
        }
    }

    pub(crate) fn with_flags(run_number: u32, event_number: u32, flags: u32) -> Self {
        Self {
            run_number,
            event_number,
            flags,
            tags: Tags::new(),
        }
    }

    pub fn is_bore(&self) -> bool {
        self.flags & FLAG_BORE != 0
    }

    pub fn is_eore(&self) -> bool {
        self.flags & FLAG_EORE != 0
    }

    pub fn set_bore(&mut self, bore: bool) {
        self.set_flag(FLAG_BORE, bore);
    }

    pub fn set_eore(&mut self, eore: bool) {
        self.set_flag(FLAG_EORE, eore);
    }

    pub(crate) fn flags(&self) -> u32 {
        self.flags
    }

    fn set_flag(&mut self, flag: u32, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }
}

/// Uniform access to the per-board byte blocks of a record.
pub trait BlockSource {
    /// Number of blocks.
    fn block_count(&self) -> usize;

    /// Bytes of the block at `index`.
    fn block(&self, index: usize) -> Option<&[u8]>;

    /// Board id of the block at `index`.
    fn block_id(&self, index: usize) -> Option<u32>;
}

/// One identified byte block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Raw data record: an ordered list of opaque byte blocks, one per board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlockRecord {
    pub header: RecordHeader,
    /// Producer kind, used to select the converter (e.g. `"EUDRB"`).
    pub subtype: String,
    pub blocks: Vec<Block>,
}

impl RawBlockRecord {
    /// Creates a data record.
    pub fn new(subtype: impl Into<String>, run_number: u32, event_number: u32) -> Self {
        Self {
            header: RecordHeader::new(run_number, event_number),
            subtype: subtype.into(),
            blocks: Vec::new(),
        }
    }

    /// Creates a begin-of-run record.
    pub fn bore(subtype: impl Into<String>, run_number: u32) -> Self {
        Self {
            header: RecordHeader::with_flags(run_number, 0, FLAG_BORE),
            subtype: subtype.into(),
            blocks: Vec::new(),
        }
    }

    /// Creates an end-of-run record.
    pub fn eore(subtype: impl Into<String>, run_number: u32, event_number: u32) -> Self {
        Self {
            header: RecordHeader::with_flags(run_number, event_number, FLAG_EORE),
            subtype: subtype.into(),
            blocks: Vec::new(),
        }
    }

    /// Appends a block and returns its index.
    pub fn add_block(&mut self, id: u32, data: impl Into<Vec<u8>>) -> usize {
        self.blocks.push(Block {
            id,
            data: data.into(),
        });
        self.blocks.len() - 1
    }
}

impl BlockSource for RawBlockRecord {
    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).map(|b| b.data.as_slice())
    }

    fn block_id(&self, index: usize) -> Option<u32> {
        self.blocks.get(index).map(|b| b.id)
    }
}

/// Legacy composite record holding one data vector per board.
///
/// Older files store EUDRB data in this shape; it decodes exactly like a
/// [`RawBlockRecord`] through [`BlockSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRecord {
    pub header: RecordHeader,
    pub boards: Vec<Block>,
}

impl BoardRecord {
    pub fn new(run_number: u32, event_number: u32) -> Self {
        Self {
            header: RecordHeader::new(run_number, event_number),
            boards: Vec::new(),
        }
    }

    pub fn bore(run_number: u32) -> Self {
        Self {
            header: RecordHeader::with_flags(run_number, 0, FLAG_BORE),
            boards: Vec::new(),
        }
    }

    pub fn add_board(&mut self, id: u32, data: impl Into<Vec<u8>>) {
        self.boards.push(Block {
            id,
            data: data.into(),
        });
    }
}

impl BlockSource for BoardRecord {
    fn block_count(&self) -> usize {
        self.boards.len()
    }

    fn block(&self, index: usize) -> Option<&[u8]> {
        self.boards.get(index).map(|b| b.data.as_slice())
    }

    fn block_id(&self, index: usize) -> Option<u32> {
        self.boards.get(index).map(|b| b.id)
    }
}

/// All sub-records built for one trigger, one per producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorRecord {
    pub header: RecordHeader,
    pub records: Vec<Record>,
}

impl DetectorRecord {
    pub fn new(run_number: u32, event_number: u32) -> Self {
        Self {
            header: RecordHeader::new(run_number, event_number),
            records: Vec::new(),
        }
    }

    pub fn bore(run_number: u32) -> Self {
        Self {
            header: RecordHeader::with_flags(run_number, 0, FLAG_BORE),
            records: Vec::new(),
        }
    }

    pub fn eore(run_number: u32, event_number: u32) -> Self {
        Self {
            header: RecordHeader::with_flags(run_number, event_number, FLAG_EORE),
            records: Vec::new(),
        }
    }

    pub fn add(&mut self, record: impl Into<Record>) {
        self.records.push(record.into());
    }
}

/// A record of any known shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Raw(RawBlockRecord),
    Board(BoardRecord),
    Detector(DetectorRecord),
}

impl Record {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Record::Raw(r) => &r.header,
            Record::Board(r) => &r.header,
            Record::Detector(r) => &r.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut RecordHeader {
        match self {
            Record::Raw(r) => &mut r.header,
            Record::Board(r) => &mut r.header,
            Record::Detector(r) => &mut r.header,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Raw(_) => RecordType::RAW,
            Record::Board(_) => RecordType::BOARD,
            Record::Detector(_) => RecordType::DETECTOR,
        }
    }

    /// Producer subtype; empty for shapes that carry none.
    pub fn subtype(&self) -> &str {
        match self {
            Record::Raw(r) => &r.subtype,
            Record::Board(_) | Record::Detector(_) => "",
        }
    }

    pub fn run_number(&self) -> u32 {
        self.header().run_number
    }

    pub fn event_number(&self) -> u32 {
        self.header().event_number
    }

    pub fn is_bore(&self) -> bool {
        self.header().is_bore()
    }

    pub fn is_eore(&self) -> bool {
        self.header().is_eore()
    }

    pub fn tags(&self) -> &Tags {
        &self.header().tags
    }

    /// Typed tag lookup, see [`Tags::get`].
    pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        self.tags().get(key, default)
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Display) {
        self.header_mut().tags.set(key, value);
    }

    /// Block view for shapes that carry board data.
    pub fn block_source(&self) -> Option<&dyn BlockSource> {
        match self {
            Record::Raw(r) => Some(r),
            Record::Board(r) => Some(r),
            Record::Detector(_) => None,
        }
    }
}

impl From<RawBlockRecord> for Record {
    fn from(record: RawBlockRecord) -> Self {
        Record::Raw(record)
    }
}

impl From<BoardRecord> for Record {
    fn from(record: BoardRecord) -> Self {
        Record::Board(record)
    }
}

impl From<DetectorRecord> for Record {
    fn from(record: DetectorRecord) -> Self {
        Record::Detector(record)
    }
}
