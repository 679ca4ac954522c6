//! Float ↔ register word conversion.
//!
//! Every sensor value is published as an IEEE-754 single-precision float
//! spread over two consecutive 16-bit registers. The float's little-endian
//! byte image is cut in half and the low half goes first, so a master reading
//! the pair should use "little-endian word order" (`F32Le` in most tools).

/// 16-bit value stored in a Modbus register.
pub type Word = u16;

/// Number of registers one encoded value occupies.
pub const WORDS_PER_VALUE: usize = 2;

/// Encode a float into `[low_word, high_word]`.
pub fn encode(value: f32) -> [Word; 2] {
    let bytes = value.to_le_bytes();
    [
        u16::from_le_bytes([bytes[0], bytes[1]]),
        u16::from_le_bytes([bytes[2], bytes[3]]),
    ]
}

/// Decode `[low_word, high_word]` back into a float.
pub fn decode(words: [Word; 2]) -> f32 {
    let low = words[0].to_le_bytes();
    let high = words[1].to_le_bytes();
    f32::from_le_bytes([low[0], low[1], high[0], high[1]])
}

/// Encode a sequence of sensor values into a flat word vector, in input order.
///
/// Values are narrowed to `f32` before encoding.
pub fn encode_values(values: &[f64]) -> Vec<Word> {
    values
        .iter()
        .flat_map(|value| encode(*value as f32))
        .collect()
}
