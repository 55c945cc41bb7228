#![allow(clippy::unusual_byte_groupings)]
//! Low-level field extraction for EUDRB data blocks.
//!
//! This module provides functions to extract fields from the raw, ZS and ZS2
//! wire layouts using bitwise operations. Offsets and widths must match
//! stored data bit for bit.

/// Number of pixel addresses in one MIMOSA26 rolling-shutter frame.
pub const ZS2_FRAME_ADDRESSES: u32 = 9216;

/// Readout latency between start-of-frame and the pixel address counter.
pub const ZS2_PIVOT_OFFSET: u32 = 56;

// ============================================================================
// Block header (raw and ZS)
// Bytes: [5] bits 1:0 | [6] | [7]  -> 18-bit pivot pixel address
// ============================================================================

/// Extracts the pivot pixel from bytes 5..=7 of `bytes`.
#[inline]
pub fn pivot_pixel(bytes: &[u8]) -> u32 {
    (u32::from(bytes[5] & 0x3) << 16) | (u32::from(bytes[6]) << 8) | u32::from(bytes[7])
}

/// Extracts the TLU trigger number from the first trailer word.
#[inline]
pub fn trailer_trigger_id(word: u32) -> u32 {
    (word >> 8) & 0xFFFF
}

// ============================================================================
// Raw pixel word (16-bit big-endian)
// Bits: [15:12] unused | [11:0] ADC value
// ============================================================================

/// Extracts the 12-bit ADC value from a raw pixel word.
#[inline]
pub fn raw_value(word: u16) -> u16 {
    word & 0x0FFF
}

/// Readout address of a raw pixel, compared against the pivot pixel.
#[inline]
pub fn raw_address(row: u32, col: u32, version: u32) -> u32 {
    if version < 2 {
        (row << 7) | col
    } else {
        (row << 9) | col
    }
}

// ============================================================================
// ZS pixel (4 bytes)
// v1: [b0 7:6] mat | [b0 2:0 b1 7:3] row | [b1 2:0 b2 7:4] col | [b2 3:0 b3] adc
// v2: [b0 7:6] mat | [b0 5:0 b1 7:5] row | [b1 4:0 b2 7:4] col | [b2 3:0 b3] adc
// ============================================================================

/// Extracts the matrix index from the first byte of a ZS pixel.
#[inline]
pub fn zs_matrix(b0: u8) -> u32 {
    3 - u32::from(b0 >> 6)
}

/// Extracts the row from a ZS pixel.
#[inline]
pub fn zs_row(b0: u8, b1: u8, version: u32) -> u32 {
    if version < 2 {
        (u32::from(b0 & 0x7) << 5) | u32::from(b1 >> 3)
    } else {
        (u32::from(b0 & 0x3F) << 3) | u32::from(b1 >> 5)
    }
}

/// Extracts the column from a ZS pixel.
#[inline]
pub fn zs_col(b1: u8, b2: u8, version: u32) -> u32 {
    if version < 2 {
        (u32::from(b1 & 0x7) << 4) | u32::from(b2 >> 4)
    } else {
        (u32::from(b1 & 0x1F) << 4) | u32::from(b2 >> 4)
    }
}

/// Extracts the 12-bit ADC value from a ZS pixel.
#[inline]
pub fn zs_value(b2: u8, b3: u8) -> u16 {
    (u16::from(b2 & 0x0F) << 8) | u16::from(b3)
}

// ============================================================================
// ZS2 block header (32-bit big-endian words)
// w0: [31:24] base address | [23:0] word count
// w3: start of frame   w4: [7:0] frame at trigger   w5: [17:0] pixel address
// ============================================================================

/// Extracts the total word count from header word 0.
#[inline]
pub fn zs2_word_count(word: u32) -> u32 {
    word & 0x00FF_FFFF
}

/// Extracts the frame number at trigger from header word 4.
#[inline]
pub fn zs2_frame_at_trigger(word: u32) -> u32 {
    word & 0xFF
}

/// Extracts the pixel address at trigger from header word 5.
#[inline]
pub fn zs2_pixel_address(word: u32) -> u32 {
    word & 0x3_FFFF
}

/// Computes the pivot pixel from start-of-frame and the pixel address at
/// trigger. Arithmetic wraps like the unsigned firmware counters.
#[inline]
pub fn zs2_pivot(start_of_frame: u32, pixel_address: u32) -> u32 {
    ZS2_FRAME_ADDRESSES
        .wrapping_add(pixel_address)
        .wrapping_sub(start_of_frame)
        .wrapping_add(ZS2_PIVOT_OFFSET)
        % ZS2_FRAME_ADDRESSES
}

/// Extracts the frame word count (16-bit words / 2) from a frame header word.
#[inline]
pub fn zs2_frame_word_count(word: u32) -> u32 {
    word & 0xFFFF
}

// ============================================================================
// ZS2 line (16-bit)
// Bits: [15] overflow | [14:4] row | [3:0] number of states
// ============================================================================

/// Extracts the number of state words following a line word.
#[inline]
pub fn line_state_count(half: u16) -> usize {
    usize::from(half & 0xF)
}

/// Extracts the row from a line word.
#[inline]
pub fn line_row(half: u16) -> u32 {
    u32::from((half >> 4) & 0x7FF)
}

/// Extracts the overflow flag from a line word.
#[inline]
pub fn line_overflow(half: u16) -> bool {
    half & 0x8000 != 0
}

// ============================================================================
// ZS2 state (16-bit)
// Bits: [15:13] unused | [12:2] column | [1:0] run length - 1
// ============================================================================

/// Extracts the first column of a state word.
#[inline]
pub fn state_column(half: u16) -> u32 {
    u32::from((half >> 2) & 0x7FF)
}

/// Extracts the number of consecutive hit pixels of a state word.
#[inline]
pub fn state_run(half: u16) -> u32 {
    u32::from(half & 0x3) + 1
}
