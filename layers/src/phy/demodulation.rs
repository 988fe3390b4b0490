//! Soft demodulation
//!
//! Converts equalized symbols and their noise variances into log-likelihood
//! ratios (TS 38.211 Section 5.1). A positive LLR favours bit 0.

use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_1_SQRT_2;

/// LLR magnitude limit
pub const LLR_MAX: f32 = 100.0;

/// Modulation schemes used by the PUCCH formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    /// π/2-BPSK
    PiHalfBpsk,
    /// QPSK
    Qpsk,
}

impl Modulation {
    /// Number of bits carried by one symbol
    pub fn bits_per_symbol(&self) -> usize {
        match self {
            Modulation::PiHalfBpsk => 1,
            Modulation::Qpsk => 2,
        }
    }

    /// Map bits to symbols
    pub fn modulate(&self, symbols: &mut [Complex32], bits: &[u8]) {
        assert_eq!(
            bits.len(),
            symbols.len() * self.bits_per_symbol(),
            "Bit count does not match the number of symbols"
        );
        match self {
            Modulation::Qpsk => {
                for (symbol, pair) in symbols.iter_mut().zip(bits.chunks_exact(2)) {
                    *symbol = Complex32::new(
                        (1.0 - 2.0 * pair[0] as f32) * FRAC_1_SQRT_2,
                        (1.0 - 2.0 * pair[1] as f32) * FRAC_1_SQRT_2,
                    );
                }
            }
            Modulation::PiHalfBpsk => {
                for (i, (symbol, &bit)) in symbols.iter_mut().zip(bits.iter()).enumerate() {
                    *symbol = pi_half_bpsk_reference(i) * (1.0 - 2.0 * bit as f32);
                }
            }
        }
    }
}

/// Constellation point of bit 0 for the `index`-th π/2-BPSK symbol
fn pi_half_bpsk_reference(index: usize) -> Complex32 {
    let point = Complex32::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2);
    if index % 2 == 0 {
        point
    } else {
        point * Complex32::i()
    }
}

fn clip(llr: f32) -> f32 {
    llr.clamp(-LLR_MAX, LLR_MAX)
}

/// Demodulate symbols into LLRs
///
/// A resource element whose noise variance is not a positive finite value
/// yields zero LLRs.
pub fn demodulate_soft(llrs: &mut [f32], symbols: &[Complex32], noise_vars: &[f32], modulation: Modulation) {
    assert_eq!(symbols.len(), noise_vars.len(), "One noise variance per symbol is required");
    assert_eq!(
        llrs.len(),
        symbols.len() * modulation.bits_per_symbol(),
        "LLR buffer does not match the number of symbols for {:?}",
        modulation
    );

    match modulation {
        Modulation::Qpsk => {
            for ((pair, &symbol), &nvar) in llrs.chunks_exact_mut(2).zip(symbols.iter()).zip(noise_vars.iter()) {
                if !(nvar.is_finite() && nvar > 0.0) {
                    pair.fill(0.0);
                    continue;
                }
                let gain = 2.0 * std::f32::consts::SQRT_2 / nvar;
                pair[0] = clip(gain * symbol.re);
                pair[1] = clip(gain * symbol.im);
            }
        }
        Modulation::PiHalfBpsk => {
            for (i, ((llr, &symbol), &nvar)) in llrs.iter_mut().zip(symbols.iter()).zip(noise_vars.iter()).enumerate() {
                if !(nvar.is_finite() && nvar > 0.0) {
                    *llr = 0.0;
                    continue;
                }
                let projection = (pi_half_bpsk_reference(i).conj() * symbol).re;
                *llr = clip(4.0 * projection / nvar);
            }
        }
    }
}

/// Hard decision on LLRs
pub fn hard_decision(bits: &mut [u8], llrs: &[f32]) {
    assert_eq!(bits.len(), llrs.len());
    for (bit, &llr) in bits.iter_mut().zip(llrs.iter()) {
        *bit = u8::from(llr < 0.0);
    }
}
