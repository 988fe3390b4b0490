//! Fixed-size DFT processor
//!
//! Wraps a pre-planned `rustfft` transform behind an input-buffer / run
//! contract so the hot path performs no allocation.

use crate::LayerError;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

/// Transform direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DftDirection {
    /// exp(-j2πkn/N)
    Forward,
    /// exp(+j2πkn/N)
    Inverse,
}

/// Unnormalized DFT of a fixed size
pub struct DftProcessor {
    size: usize,
    direction: DftDirection,
    plan: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl DftProcessor {
    /// Plan a transform of `size` points
    pub fn new(planner: &mut FftPlanner<f32>, size: usize, direction: DftDirection) -> Result<Self, LayerError> {
        if size == 0 {
            return Err(LayerError::InvalidConfiguration("DFT size must be positive".to_string()));
        }

        let plan = match direction {
            DftDirection::Forward => planner.plan_fft_forward(size),
            DftDirection::Inverse => planner.plan_fft_inverse(size),
        };
        let scratch = vec![Complex32::new(0.0, 0.0); plan.get_inplace_scratch_len()];

        Ok(Self {
            size,
            direction,
            plan,
            buffer: vec![Complex32::new(0.0, 0.0); size],
            scratch,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn direction(&self) -> DftDirection {
        self.direction
    }

    /// Input buffer to fill before calling [`DftProcessor::run`]
    pub fn input_mut(&mut self) -> &mut [Complex32] {
        &mut self.buffer
    }

    /// Run the transform in place and return the output
    pub fn run(&mut self) -> &[Complex32] {
        self.plan.process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer
    }
}

impl std::fmt::Debug for DftProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DftProcessor")
            .field("size", &self.size)
            .field("direction", &self.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_of_impulse_is_flat() {
        let mut planner = FftPlanner::new();
        let mut dft = DftProcessor::new(&mut planner, 12, DftDirection::Forward).unwrap();
        let input = dft.input_mut();
        input.fill(Complex32::new(0.0, 0.0));
        input[0] = Complex32::new(1.0, 0.0);

        let output = dft.run();
        assert!(output.iter().all(|v| (v - Complex32::new(1.0, 0.0)).norm() < 1e-6));
    }

    #[test]
    fn test_forward_inverse_scale() {
        let mut planner = FftPlanner::new();
        let mut forward = DftProcessor::new(&mut planner, 36, DftDirection::Forward).unwrap();
        let mut inverse = DftProcessor::new(&mut planner, 36, DftDirection::Inverse).unwrap();

        let signal: Vec<Complex32> = (0..36).map(|i| Complex32::new(i as f32, -(i as f32) * 0.5)).collect();
        forward.input_mut().copy_from_slice(&signal);
        let spectrum = forward.run().to_vec();
        inverse.input_mut().copy_from_slice(&spectrum);
        let recovered = inverse.run();

        for (r, s) in recovered.iter().zip(signal.iter()) {
            assert!((r / 36.0 - s).norm() < 1e-3);
        }
    }

    #[test]
    fn test_invalid_size() {
        let mut planner = FftPlanner::new();
        assert!(DftProcessor::new(&mut planner, 0, DftDirection::Forward).is_err());
    }
}
