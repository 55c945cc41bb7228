//! EUDRB block decoder.
//!
//! Turns one board's raw byte block into a [`StandardPlane`]. Every routine is
//! a pure function of the block and its resolved [`BoardInfo`], so blocks of
//! different records can be decoded in parallel.

use crate::board::{BoardInfo, DecodeMode};
use crate::parser;
use crate::record::RecordType;
use crate::types::{Pixel, StandardPlane};
use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;
use tracing::{trace, warn};

/// Errors that abort decoding of the current record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unknown detector {name:?} (expected one of {known})")]
    UnknownDetector { name: String, known: String },

    #[error("Unknown mode {0:?} (expected one of ZS, ZS2, RAW2, RAW3)")]
    UnknownMode(String),

    #[error("EUDRB V{version} decoding not yet implemented ({mode} mode)")]
    Unimplemented { mode: DecodeMode, version: u32 },

    #[error("Bad raw data size ({actual}) expecting {expected} or {missing_pixel}")]
    BadRawSize {
        actual: usize,
        expected: usize,
        missing_pixel: usize,
    },

    #[error("Bad data packet (only {size} bytes, need at least {minimum})")]
    ShortBlock { size: usize, minimum: usize },

    #[error("Bad wordcount ({wordcount}, bytes={bytes})")]
    BadWordCount { wordcount: u32, bytes: usize },

    #[error("Bad M26 word count in frame {frame} ({count}, remain={remaining}, total={total})")]
    BadFrameWordCount {
        frame: u8,
        count: u32,
        remaining: u32,
        total: u32,
    },

    #[error("Unrecognised ID ({id}, num={count}) converting EUDRB event")]
    UnrecognizedId { id: u32, count: usize },

    #[error("Converter used before a begin-of-run record initialized it")]
    NotInitialized,

    #[error("No converter registered for {record_type} record {subtype:?}")]
    NoConverter {
        record_type: RecordType,
        subtype: String,
    },

    #[error("Record type {0} carries no board blocks")]
    UnsupportedRecord(RecordType),
}

/// Header size of raw and ZS blocks.
pub const HEADER_SIZE: usize = 8;
/// Trailer size of raw and ZS blocks.
pub const TRAILER_SIZE: usize = 8;
/// Smallest valid ZS2 block.
pub const ZS2_MIN_SIZE: usize = 64;
/// Trigger id reported when a record carries no usable block.
pub const UNKNOWN_TRIGGER_ID: u32 = u32::MAX;

const PRODUCER: &str = "EUDRB";

/// A decoded plane plus its ZS2 overflow count.
#[derive(Debug)]
pub struct DecodedPlane {
    pub plane: StandardPlane,
    /// Number of overflowed ZS2 lines (always 0 for other modes)
    pub overflows: u32,
}

/// Decodes one board block according to its mode.
pub fn decode_plane(data: &[u8], id: u32, info: &BoardInfo) -> Result<DecodedPlane, DecodeError> {
    let sensor = info.sensor();
    let mut plane = StandardPlane::new(id, PRODUCER, sensor.name, sensor.width, sensor.height);
    plane.set_trigger_id(trigger_id(data).unwrap_or(UNKNOWN_TRIGGER_ID));

    let overflows = match info.mode {
        DecodeMode::Zs2 => decode_zs2(&mut plane, data, info)?,
        DecodeMode::Zs => {
            decode_zs(&mut plane, data, info)?;
            0
        }
        DecodeMode::Raw1 | DecodeMode::Raw2 | DecodeMode::Raw3 => {
            decode_raw(&mut plane, data, info)?;
            0
        }
    };

    Ok(DecodedPlane { plane, overflows })
}

/// Extracts the trigger counter from the last 8 bytes of a block.
pub fn trigger_id(data: &[u8]) -> Option<u32> {
    let start = data.len().checked_sub(TRAILER_SIZE)?;
    let word = BigEndian::read_u32(&data[start..start + 4]);
    Some(parser::trailer_trigger_id(word))
}

fn reject_v3(info: &BoardInfo) -> Result<(), DecodeError> {
    if info.version > 2 {
        return Err(DecodeError::Unimplemented {
            mode: info.mode,
            version: info.version,
        });
    }
    Ok(())
}

/// Decodes a full-frame raw block (1, 2 or 3 frames).
pub fn decode_raw(plane: &mut StandardPlane, data: &[u8], info: &BoardInfo) -> Result<(), DecodeError> {
    reject_v3(info)?;
    let sensor = info.sensor();
    let frames = info.mode.frames();

    let expected = 2 * (sensor.cols * sensor.rows * sensor.mats * frames) as usize;
    // the last pixel of the last row is not always transferred
    let missing = expected.saturating_sub(2 * (sensor.mats * frames) as usize);

    let payload_len = data.len().checked_sub(HEADER_SIZE + TRAILER_SIZE);
    let missing_pixel = match payload_len {
        Some(n) if n == expected => false,
        Some(n) if n == missing => true,
        _ => {
            return Err(DecodeError::BadRawSize {
                actual: data.len().saturating_sub(HEADER_SIZE + TRAILER_SIZE),
                expected,
                missing_pixel: missing,
            })
        }
    };

    plane.set_pivot_pixel(parser::pivot_pixel(data));
    let pivot_pixel = plane.pivot_pixel();
    let payload = &data[HEADER_SIZE..data.len() - TRAILER_SIZE];
    plane.reserve(payload.len() / 2);

    let mut words = payload.chunks_exact(2).map(BigEndian::read_u16);
    for row in 0..sensor.rows {
        for col in 0..sensor.cols {
            if missing_pixel && row == sensor.rows - 1 && col == sensor.cols - 1 {
                break;
            }
            let pivot = parser::raw_address(row, col, info.version) >= pivot_pixel;
            for frame in 0..frames {
                for mat in 0..sensor.mats {
                    let (x, y) = sensor.remap(col, row, mat);
                    let Some(word) = words.next() else {
                        return Err(DecodeError::BadRawSize {
                            actual: payload.len(),
                            expected,
                            missing_pixel: missing,
                        });
                    };
                    plane.push_pixel(Pixel::new(x, y, parser::raw_value(word), pivot, frame as u8));
                }
            }
        }
    }

    Ok(())
}

/// Decodes a zero-suppressed (ZS) block.
pub fn decode_zs(plane: &mut StandardPlane, data: &[u8], info: &BoardInfo) -> Result<(), DecodeError> {
    reject_v3(info)?;
    let minimum = HEADER_SIZE + TRAILER_SIZE;
    if data.len() < minimum {
        return Err(DecodeError::ShortBlock {
            size: data.len(),
            minimum,
        });
    }

    // a zero matrix byte in the last slot marks a padding pixel
    let padding = data[data.len() - TRAILER_SIZE - 4] == 0;
    let npixels = ((data.len() - minimum) / 4).saturating_sub(usize::from(padding));

    // the pivot sits at bytes 5..=7 of the pixel area
    let pixels = &data[HEADER_SIZE..];
    plane.set_pivot_pixel(parser::pivot_pixel(pixels));
    plane.reserve(npixels);

    let sensor = info.sensor();
    for chunk in pixels.chunks_exact(4).take(npixels) {
        let mat = parser::zs_matrix(chunk[0]);
        let row = parser::zs_row(chunk[0], chunk[1], info.version);
        let col = parser::zs_col(chunk[1], chunk[2], info.version);
        let (x, y) = sensor.remap(col, row, mat);
        plane.push_pixel(Pixel::new(x, y, parser::zs_value(chunk[2], chunk[3]), false, 0));
    }

    Ok(())
}

#[inline]
fn word_at(data: &[u8], index: usize) -> Option<u32> {
    data.get(index * 4..index * 4 + 4).map(BigEndian::read_u32)
}

/// Splits `count` words starting at `offset` into 16-bit halves, low half
/// first.
fn frame_halves(data: &[u8], offset: usize, count: usize) -> Option<Vec<u16>> {
    let bytes = data.get(offset * 4..(offset + count) * 4)?;
    let mut halves = Vec::with_capacity(count * 2);
    for word in bytes.chunks_exact(4).map(BigEndian::read_u32) {
        halves.push((word & 0xFFFF) as u16);
        halves.push((word >> 16) as u16);
    }
    Some(halves)
}

/// Decodes a MIMOSA26 zero-suppressed (ZS2) block with two frames per
/// trigger. Returns the number of overflowed lines.
pub fn decode_zs2(plane: &mut StandardPlane, data: &[u8], info: &BoardInfo) -> Result<u32, DecodeError> {
    reject_v3(info)?;
    if data.len() < ZS2_MIN_SIZE {
        return Err(DecodeError::ShortBlock {
            size: data.len(),
            minimum: ZS2_MIN_SIZE,
        });
    }
    let header = |index| word_at(data, index).unwrap_or(0);

    let wordcount = parser::zs2_word_count(header(0));
    if wordcount as usize * 4 + 16 != data.len() {
        return Err(DecodeError::BadWordCount {
            wordcount,
            bytes: data.len(),
        });
    }

    let start_of_frame = header(3);
    let pixel_address = parser::zs2_pixel_address(header(5));
    plane.set_pivot_pixel(parser::zs2_pivot(start_of_frame, pixel_address));
    let pivot_row = plane.pivot_pixel() / 16;
    trace!(
        board = plane.id(),
        start_of_frame,
        frame_at_trigger = parser::zs2_frame_at_trigger(header(4)),
        pixel_address,
        pivot = plane.pivot_pixel(),
        "ZS2 header"
    );

    let mut remaining = wordcount - 12;
    let mut offset = 5;
    let mut total_overflows = 0;

    for frame in 0..2u8 {
        offset += 2;
        trace!(board = plane.id(), frame, counter = header(offset), "M26 frame counter");
        offset += 1;
        let Some(count_word) = word_at(data, offset) else {
            warn!(board = plane.id(), frame, offset, "ZS2 frame header beyond end of block");
            break;
        };
        let count = parser::zs2_frame_word_count(count_word);
        if count > remaining {
            return Err(DecodeError::BadFrameWordCount {
                frame,
                count,
                remaining,
                total: wordcount,
            });
        }
        remaining -= count;

        let Some(halves) = frame_halves(data, offset + 1, count as usize) else {
            warn!(board = plane.id(), frame, count, "ZS2 frame data beyond end of block");
            break;
        };
        offset += count as usize;

        let (npixels, overflows) = decode_zs2_lines(plane, &halves, frame, pivot_row);
        trace!(board = plane.id(), frame, npixels, overflows, "ZS2 frame decoded");
        total_overflows += overflows;
        offset += 1;
    }

    let trailer = data.len() / 4 - 2;
    trace!(
        board = plane.id(),
        tlu_event = parser::trailer_trigger_id(header(trailer)),
        event_words = header(trailer + 1) & 0x7_FFFF,
        "ZS2 trailer"
    );

    Ok(total_overflows)
}

/// Expands the line/state words of one frame. A line announcing more states
/// than the frame holds is dropped and ends the frame.
fn decode_zs2_lines(plane: &mut StandardPlane, halves: &[u16], frame: u8, pivot_row: u32) -> (u32, u32) {
    let mut npixels = 0;
    let mut overflows = 0;
    let mut i = 0;

    // the final half-word never starts a line
    while i + 1 < halves.len() {
        let line = halves[i];
        let nstates = parser::line_state_count(line);
        let row = parser::line_row(line);

        let Some(states) = halves.get(i + 1..i + 1 + nstates) else {
            warn!(
                board = plane.id(),
                frame,
                row,
                states = nstates,
                available = halves.len() - i - 1,
                "Ignoring bad ZS2 line (too many states)"
            );
            break;
        };

        let pivot = row >= pivot_row;
        for &state in states {
            let column = parser::state_column(state);
            let run = parser::state_run(state);
            for j in 0..run {
                plane.push_pixel(Pixel::new(column + j, row, 1, pivot, frame));
            }
            npixels += run;
        }

        if parser::line_overflow(line) {
            overflows += 1;
            trace!(board = plane.id(), row, "ZS2 line overflow");
        }
        i += nstates + 1;
    }

    (npixels, overflows)
}
