//! Block builders shared by unit tests.

/// ZS2 line word.
pub fn line(row: u16, states: u16, overflow: bool) -> u16 {
    (u16::from(overflow) << 15) | (row << 4) | states
}

/// ZS2 state word covering `run` consecutive columns.
pub fn state(col: u16, run: u16) -> u16 {
    (col << 2) | (run - 1)
}

/// Packs half-words into data words, low half first.
pub fn pack(halves: &[u16]) -> Vec<u32> {
    halves
        .chunks(2)
        .map(|pair| u32::from(pair[0]) | (u32::from(*pair.get(1).unwrap_or(&0)) << 16))
        .collect()
}

/// Builds a ZS2 block (start of frame 100, pixel address 9300, so pivot 40)
/// around the given per-frame data words.
pub fn zs2_block(frame1: &[u32], frame2: &[u32], trigger: u16) -> Vec<u8> {
    let mut words = vec![0u32, 0, 0, 100, 0x05, 9300, 0, 1, frame1.len() as u32];
    words.extend_from_slice(frame1);
    words.extend_from_slice(&[0, 0, 2, frame2.len() as u32]);
    words.extend_from_slice(frame2);
    words.push(0);
    words.push(u32::from(trigger) << 8);
    words.push(0);
    words[0] = 0xAB00_0000 | (words.len() as u32 - 4);

    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}
