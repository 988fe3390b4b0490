//! Common Utilities
//!
//! Power and bit conversions used across the uplink receiver

use tracing::trace;

/// Convert a linear power value to decibels
pub fn convert_power_to_db(value: f32) -> f32 {
    10.0 * value.log10()
}

/// Convert a linear amplitude value to decibels
pub fn convert_amplitude_to_db(value: f32) -> f32 {
    20.0 * value.log10()
}

/// Convert decibels to a linear power value
pub fn convert_db_to_power(value_db: f32) -> f32 {
    10.0_f32.powf(value_db / 10.0)
}

/// Unpack the `nof_bits` least significant bits of `value` (MSB first), one bit per byte
pub fn unpack_bits(value: u32, nof_bits: usize) -> Vec<u8> {
    let bits: Vec<u8> = (0..nof_bits).rev().map(|i| ((value >> i) & 1) as u8).collect();
    trace!("Unpacked {:#x} into {} bits", value, nof_bits);
    bits
}


/// Count positions where two unpacked bit sequences differ
pub fn count_bit_errors(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).filter(|(x, y)| (*x & 1) != (*y & 1)).count()
}
