//! Transform precoding for PUCCH Formats 3 and 4
//!
//! Reverses the DFT spreading (TS 38.211 Section 6.3.2.6.4) applied by the UE
//! to one OFDM symbol and recombines the post-equalization noise variances.

use crate::LayerError;
use common::types::{MAX_RB, NRE};
use num_complex::Complex32;
use rustfft::FftPlanner;
use tracing::debug;

use super::dft::{DftDirection, DftProcessor};

/// Checks that `n` factors as 2^a * 3^b * 5^c
const fn is_two_three_five_smooth(n: usize) -> bool {
    if n == 0 {
        return false;
    }
    let mut value = n;
    while value % 2 == 0 {
        value /= 2;
    }
    while value % 3 == 0 {
        value /= 3;
    }
    while value % 5 == 0 {
        value /= 5;
    }
    value == 1
}

/// Resource block counts that admit transform precoding, indexed by count
pub const VALID_NOF_PRB: [bool; MAX_RB + 1] = {
    let mut table = [false; MAX_RB + 1];
    let mut n = 1;
    while n <= MAX_RB {
        table[n] = is_two_three_five_smooth(n);
        n += 1;
    }
    table
};

/// Check whether `nof_prb` resource blocks can be transform precoded
pub fn is_valid_nof_prb(nof_prb: usize) -> bool {
    nof_prb <= MAX_RB && VALID_NOF_PRB[nof_prb]
}

/// DFT based transform precoder
///
/// All transform sizes up to the configured bandwidth are planned at
/// construction.
#[derive(Debug)]
pub struct TransformPrecoder {
    max_nof_prb: usize,
    /// Inverse transforms indexed by number of resource blocks
    idft: Vec<Option<DftProcessor>>,
    /// Forward transforms indexed by number of resource blocks
    dft: Vec<Option<DftProcessor>>,
}

impl TransformPrecoder {
    /// Create a transform precoder supporting up to `max_nof_prb` resource blocks
    pub fn new(max_nof_prb: usize) -> Result<Self, LayerError> {
        if max_nof_prb == 0 || max_nof_prb > MAX_RB {
            return Err(LayerError::InvalidConfiguration(format!(
                "Transform precoder bandwidth of {} PRB outside 1..={}",
                max_nof_prb, MAX_RB
            )));
        }

        let mut planner = FftPlanner::new();
        let mut idft = Vec::with_capacity(max_nof_prb + 1);
        let mut dft = Vec::with_capacity(max_nof_prb + 1);
        for nof_prb in 0..=max_nof_prb {
            if is_valid_nof_prb(nof_prb) {
                let size = nof_prb * NRE;
                idft.push(Some(DftProcessor::new(&mut planner, size, DftDirection::Inverse)?));
                dft.push(Some(DftProcessor::new(&mut planner, size, DftDirection::Forward)?));
            } else {
                idft.push(None);
                dft.push(None);
            }
        }

        debug!(
            "Planned transform precoder for {} valid PRB counts up to {}",
            idft.iter().filter(|p| p.is_some()).count(),
            max_nof_prb
        );

        Ok(Self { max_nof_prb, idft, dft })
    }

    pub fn max_nof_prb(&self) -> usize {
        self.max_nof_prb
    }

    /// Reverse the transform precoding of one OFDM symbol
    pub fn deprecode_symbol(&mut self, output: &mut [Complex32], input: &[Complex32]) {
        let nof_prb = self.check_sizes(output.len(), input.len());
        let processor = self.idft[nof_prb]
            .as_mut()
            .expect("every valid PRB count is planned at construction");
        Self::transform(processor, output, input);
    }

    /// Apply transform precoding to one OFDM symbol
    pub fn precode_symbol(&mut self, output: &mut [Complex32], input: &[Complex32]) {
        let nof_prb = self.check_sizes(output.len(), input.len());
        let processor = self.dft[nof_prb]
            .as_mut()
            .expect("every valid PRB count is planned at construction");
        Self::transform(processor, output, input);
    }

    /// Recompute per resource element noise variances after deprecoding
    ///
    /// Non-positive, NaN and infinite entries are passed through unchanged.
    /// Every other entry is replaced by the mean of those other entries.
    pub fn deprecode_noise(output: &mut [f32], input: &[f32]) {
        assert_eq!(
            output.len(),
            input.len(),
            "Noise variance buffers have different sizes"
        );

        let is_usable = |value: f32| value.is_finite() && value > 0.0;
        let (sum, count) = input
            .iter()
            .filter(|&&value| is_usable(value))
            .fold((0.0f32, 0usize), |(sum, count), &value| (sum + value, count + 1));

        let mean = if count > 0 { sum / count as f32 } else { 0.0 };
        for (out, &value) in output.iter_mut().zip(input.iter()) {
            *out = if is_usable(value) { mean } else { value };
        }
    }

    fn check_sizes(&self, output_len: usize, input_len: usize) -> usize {
        assert_eq!(output_len, input_len, "Input and output sizes do not match");
        assert_eq!(
            input_len % NRE,
            0,
            "Number of subcarriers {} is not a multiple of {}",
            input_len,
            NRE
        );
        let nof_prb = input_len / NRE;
        assert!(
            is_valid_nof_prb(nof_prb),
            "Invalid number of PRB {} for transform precoding",
            nof_prb
        );
        assert!(
            nof_prb <= self.max_nof_prb,
            "Number of PRB {} exceeds the planned maximum {}",
            nof_prb,
            self.max_nof_prb
        );
        nof_prb
    }

    fn transform(processor: &mut DftProcessor, output: &mut [Complex32], input: &[Complex32]) {
        let scale = 1.0 / (input.len() as f32).sqrt();
        processor.input_mut().copy_from_slice(input);
        for (out, value) in output.iter_mut().zip(processor.run().iter()) {
            *out = value * scale;
        }
    }
}
