//! Sequence generators for the uplink receiver
//!
//! Pseudo-random (Gold) sequence per TS 38.211 Section 5.2.1 and the
//! length-12 low-PAPR base sequences per TS 38.211 Section 5.2.2.

use common::types::NRE;
use num_complex::Complex32;
use std::f32::consts::PI;

/// Number of Gold sequence advances before the first output bit
const GOLD_NC: usize = 1600;

/// Number of sequence groups
pub const NOF_GROUPS: usize = 30;

/// Number of cyclic shifts available to a length-12 sequence
pub const NOF_ALPHAS: usize = NRE;

/// Pseudo-random bit sequence generator
pub trait PseudoRandomGenerator: Send {
    /// Restart the sequence from `c_init`
    fn init(&mut self, c_init: u32);

    /// Skip `count` bits
    fn advance(&mut self, count: usize);

    /// Produce the next bit
    fn next_bit(&mut self) -> u8;

    /// Fill `bits` with the next sequence bits, one bit per byte
    fn generate_bits(&mut self, bits: &mut [u8]) {
        for bit in bits.iter_mut() {
            *bit = self.next_bit();
        }
    }

    /// Apply the sequence to soft bits: every LLR paired with a one bit flips sign
    fn apply_xor_llr(&mut self, output: &mut [f32], input: &[f32]) {
        assert_eq!(output.len(), input.len(), "LLR buffer sizes do not match");
        for (out, &llr) in output.iter_mut().zip(input.iter()) {
            *out = if self.next_bit() == 1 { -llr } else { llr };
        }
    }
}

/// Gold sequence generator with two length-31 LFSRs
#[derive(Debug, Clone)]
pub struct GoldSequenceGenerator {
    x1: u32,
    x2: u32,
}

impl GoldSequenceGenerator {
    /// Create a generator initialized with `c_init`
    pub fn new(c_init: u32) -> Self {
        let mut generator = Self { x1: 0, x2: 0 };
        generator.init(c_init);
        generator
    }

    /// Advance both LFSRs by one step
    fn step(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & 0x7FFFFFFF;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & 0x7FFFFFFF;
    }
}

impl PseudoRandomGenerator for GoldSequenceGenerator {
    fn init(&mut self, c_init: u32) {
        // x1(0) = 1, x1(n) = 0 for n = 1..30
        self.x1 = 1;
        self.x2 = c_init & 0x7FFFFFFF;
        for _ in 0..GOLD_NC {
            self.step();
        }
    }

    fn advance(&mut self, count: usize) {
        for _ in 0..count {
            self.step();
        }
    }

    fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.step();
        c as u8
    }
}

/// Collection of low-PAPR sequences indexed by group, base sequence and cyclic shift
pub trait LowPaprSequenceCollection: Send {
    /// Sequence length
    fn sequence_length(&self) -> usize;

    /// Sequence for group `u`, base sequence `v` and cyclic shift index `alpha_index`
    fn get(&self, u: u32, v: u32, alpha_index: u32) -> &[Complex32];
}

/// Phase factors of the length-12 base sequences (TS 38.211 Table 5.2.2.2-2)
const PHI_M12: [[i8; NRE]; NOF_GROUPS] = [
    [-3, 1, -3, -3, -3, 3, -3, -1, 1, 1, 1, -3],
    [-3, 3, 1, -3, 1, 3, -1, -1, 1, 3, 3, 3],
    [-3, 3, 3, 1, -3, 3, -1, 1, 3, -3, 3, -3],
    [-3, -3, -1, 3, 3, 3, -3, 3, -3, 1, -1, -3],
    [-3, -1, -1, 1, 3, 1, 1, -1, 1, -1, -3, 1],
    [-3, -3, 3, 1, -3, -3, -3, -1, 3, -1, 1, 3],
    [1, -1, 3, -1, -1, -1, -3, -1, 1, 1, 1, -3],
    [-1, -3, 3, -1, -3, -3, -3, -1, 1, -1, 1, -3],
    [-3, -1, 3, 1, -3, -1, -3, 3, 1, 3, 3, 1],
    [-3, -1, -1, -3, -3, -1, -3, 3, 1, 3, -1, -3],
    [-3, 3, -3, 3, 3, -3, -1, -1, 3, 3, 1, -3],
    [-3, -1, -3, -1, -1, -3, 3, 3, -1, -1, 1, -3],
    [-3, -1, 3, -3, -3, -1, -3, 1, -1, -3, 3, 3],
    [-3, 1, -1, -1, 3, 3, -3, -1, -1, -3, -1, -3],
    [1, 3, -3, 1, 3, 3, 3, 1, -1, 1, -1, 3],
    [-3, 1, 3, -1, -1, -3, -3, -1, -1, 3, 1, -3],
    [-1, -1, -1, -1, 1, -3, -1, 3, 3, -1, -3, 1],
    [-1, 1, 1, -1, 1, 3, 3, -1, -1, -3, 1, -3],
    [-3, 1, 3, 3, -1, -1, -3, 3, 3, -3, 3, -3],
    [-3, -3, 3, -3, -1, 3, 3, 3, -1, -3, 1, -3],
    [3, 1, 3, 1, 3, -3, -1, 1, 3, 1, -1, -3],
    [-3, 3, 1, 3, -3, 1, 1, 1, 1, 3, -3, 3],
    [-3, 3, 3, 3, -1, -3, -3, -1, -3, 1, 3, -3],
    [3, -1, -3, 3, -3, -1, 3, 3, 3, -3, -1, -3],
    [-3, -1, 1, -3, 1, 3, 3, 3, -1, -3, 3, 3],
    [-3, 3, 1, -1, 3, 3, -3, 1, -1, 1, -1, 1],
    [-1, 1, 3, -3, 1, -1, 1, -1, -1, -3, 1, -1],
    [-3, -3, 3, 3, 3, -3, -1, 1, -3, 3, 1, -3],
    [1, -1, 3, 1, 1, -1, -1, -1, 1, 3, -3, 1],
    [-3, 3, -3, 3, -3, -3, 3, -1, -1, 1, 3, -3],
];

/// Length-12 low-PAPR sequences, precomputed for every group and cyclic shift
///
/// Sequences shorter than 72 have a single base sequence per group, so the
/// base sequence number is accepted but does not select a different sequence.
#[derive(Debug, Clone)]
pub struct ShortLowPaprCollection {
    /// [group][alpha index][n]
    sequences: Vec<[[Complex32; NRE]; NOF_ALPHAS]>,
}

impl ShortLowPaprCollection {
    pub fn new() -> Self {
        let sequences = PHI_M12
            .iter()
            .map(|phi| {
                let mut shifted = [[Complex32::new(0.0, 0.0); NRE]; NOF_ALPHAS];
                for (alpha_index, sequence) in shifted.iter_mut().enumerate() {
                    let alpha = 2.0 * PI * alpha_index as f32 / NRE as f32;
                    for (n, value) in sequence.iter_mut().enumerate() {
                        let phase = alpha * n as f32 + phi[n] as f32 * PI / 4.0;
                        *value = Complex32::from_polar(1.0, phase);
                    }
                }
                shifted
            })
            .collect();

        Self { sequences }
    }
}

impl Default for ShortLowPaprCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl LowPaprSequenceCollection for ShortLowPaprCollection {
    fn sequence_length(&self) -> usize {
        NRE
    }

    fn get(&self, u: u32, v: u32, alpha_index: u32) -> &[Complex32] {
        assert!((u as usize) < NOF_GROUPS, "Invalid sequence group {}", u);
        assert!(v < 2, "Invalid base sequence number {}", v);
        assert!((alpha_index as usize) < NOF_ALPHAS, "Invalid cyclic shift index {}", alpha_index);
        &self.sequences[u as usize][alpha_index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gold_sequence_reference() {
        // c_init = 0 leaves only the x1 contribution; first bits of the reference sequence
        let mut generator = GoldSequenceGenerator::new(0);
        let mut bits = [0u8; 16];
        generator.generate_bits(&mut bits);
        assert_eq!(bits, [0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 1, 0, 1, 0]);

        let mut seeded = GoldSequenceGenerator::new(0x1234);
        let mut seeded_bits = [0u8; 16];
        seeded.generate_bits(&mut seeded_bits);
        assert_eq!(seeded_bits, [0, 1, 0, 0, 0, 0, 0, 1, 0, 1, 0, 1, 0, 0, 1, 0]);

        // Restarting reproduces the same bits
        let mut again = [0u8; 16];
        generator.init(0);
        generator.generate_bits(&mut again);
        assert_eq!(bits, again);
    }

    #[test]
    fn test_gold_sequence_advance() {
        let mut reference = GoldSequenceGenerator::new(0x1234);
        let mut bits = [0u8; 40];
        reference.generate_bits(&mut bits);

        let mut skipped = GoldSequenceGenerator::new(0x1234);
        skipped.advance(25);
        let mut tail = [0u8; 15];
        skipped.generate_bits(&mut tail);
        assert_eq!(&bits[25..], &tail);
    }

    #[test]
    fn test_gold_sequence_balance() {
        let mut generator = GoldSequenceGenerator::new(65535 * 32768 + 1);
        let mut bits = vec![0u8; 10000];
        generator.generate_bits(&mut bits);
        let ones = bits.iter().filter(|&&b| b == 1).count();
        assert!((4700..5300).contains(&ones), "unbalanced sequence: {} ones", ones);
    }

    #[test]
    fn test_apply_xor_llr() {
        let mut generator = GoldSequenceGenerator::new(77);
        let mut bits = [0u8; 8];
        generator.generate_bits(&mut bits);

        let input = [1.0f32, -2.0, 3.0, -4.0, 5.0, -6.0, 7.0, -8.0];
        let mut output = [0.0f32; 8];
        generator.init(77);
        generator.apply_xor_llr(&mut output, &input);
        for i in 0..8 {
            let expected = if bits[i] == 1 { -input[i] } else { input[i] };
            assert_eq!(output[i], expected);
        }
    }

    #[test]
    fn test_low_papr_unit_modulus() {
        let collection = ShortLowPaprCollection::new();
        for u in 0..NOF_GROUPS as u32 {
            for alpha in 0..NOF_ALPHAS as u32 {
                let sequence = collection.get(u, 0, alpha);
                assert_eq!(sequence.len(), NRE);
                assert!(sequence.iter().all(|s| (s.norm() - 1.0).abs() < 1e-5));
            }
        }
    }

    #[test]
    fn test_low_papr_cyclic_shifts_orthogonal() {
        let collection = ShortLowPaprCollection::new();
        let a = collection.get(5, 0, 2);
        for alpha in 0..NOF_ALPHAS as u32 {
            let b = collection.get(5, 0, alpha);
            let dot: Complex32 = a.iter().zip(b.iter()).map(|(x, y)| x * y.conj()).sum();
            let expected = if alpha == 2 { NRE as f32 } else { 0.0 };
            assert!((dot.norm() - expected).abs() < 1e-4, "alpha {} dot {}", alpha, dot);
        }
    }
}
