//! Channel estimate container
//!
//! Holds the per resource element channel coefficients produced by a DM-RS
//! based estimator, together with the per receive port noise variance and
//! the power measurements the estimator reports.

use common::types::{MAX_NSYMB_PER_SLOT, NRE};
use ndarray::Array4;
use num_complex::Complex32;

/// Dimensions of a channel estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEstimateDimensions {
    /// Number of resource blocks
    pub nof_prb: usize,
    /// Number of OFDM symbols
    pub nof_symbols: usize,
    /// Number of receive ports
    pub nof_rx_ports: usize,
    /// Number of transmit layers
    pub nof_tx_layers: usize,
}

impl Default for ChannelEstimateDimensions {
    fn default() -> Self {
        Self {
            nof_prb: 1,
            nof_symbols: MAX_NSYMB_PER_SLOT,
            nof_rx_ports: 1,
            nof_tx_layers: 1,
        }
    }
}

/// Channel estimate for one slot
#[derive(Debug, Clone)]
pub struct ChannelEstimate {
    /// Coefficients: [layer, rx port, symbol, subcarrier]
    coefficients: Array4<Complex32>,
    /// Noise variance per receive port
    noise_variance: Vec<f32>,
    /// Reference signal received power per receive port
    rsrp: Vec<f32>,
    /// Energy per resource element per receive port
    epre: Vec<f32>,
    /// Signal-to-noise ratio per receive port
    snr: Vec<f32>,
    /// Time alignment in seconds, if the estimator measured it
    time_alignment: Option<f32>,
}

impl ChannelEstimate {
    /// Create a zeroed channel estimate
    pub fn new(dims: ChannelEstimateDimensions) -> Self {
        Self {
            coefficients: Array4::zeros((
                dims.nof_tx_layers,
                dims.nof_rx_ports,
                dims.nof_symbols,
                dims.nof_prb * NRE,
            )),
            noise_variance: vec![0.0; dims.nof_rx_ports],
            rsrp: vec![0.0; dims.nof_rx_ports],
            epre: vec![0.0; dims.nof_rx_ports],
            snr: vec![0.0; dims.nof_rx_ports],
            time_alignment: None,
        }
    }

    /// Current dimensions
    pub fn dims(&self) -> ChannelEstimateDimensions {
        let (nof_tx_layers, nof_rx_ports, nof_symbols, nof_subc) = self.coefficients.dim();
        ChannelEstimateDimensions {
            nof_prb: nof_subc / NRE,
            nof_symbols,
            nof_rx_ports,
            nof_tx_layers,
        }
    }

    /// Change the dimensions, keeping the storage when they already match
    pub fn resize(&mut self, dims: ChannelEstimateDimensions) {
        if self.dims() != dims {
            *self = Self::new(dims);
        } else {
            self.time_alignment = None;
        }
    }

    /// Coefficients of one symbol for a given port and layer
    pub fn symbol_coefficients(&self, symbol: usize, rx_port: usize, tx_layer: usize) -> &[Complex32] {
        self.coefficients
            .slice(ndarray::s![tx_layer, rx_port, symbol, ..])
            .to_slice()
            .expect("channel estimate rows are contiguous in standard layout")
    }

    /// Mutable coefficients of one symbol for a given port and layer
    pub fn symbol_coefficients_mut(&mut self, symbol: usize, rx_port: usize, tx_layer: usize) -> &mut [Complex32] {
        self.coefficients
            .slice_mut(ndarray::s![tx_layer, rx_port, symbol, ..])
            .into_slice()
            .expect("channel estimate rows are contiguous in standard layout")
    }

    /// Read a single coefficient
    pub fn get(&self, subcarrier: usize, symbol: usize, rx_port: usize, tx_layer: usize) -> Complex32 {
        self.coefficients[(tx_layer, rx_port, symbol, subcarrier)]
    }

    /// Write a single coefficient
    pub fn set(&mut self, value: Complex32, subcarrier: usize, symbol: usize, rx_port: usize, tx_layer: usize) {
        self.coefficients[(tx_layer, rx_port, symbol, subcarrier)] = value;
    }

    /// Noise variance measured on one receive port
    pub fn noise_variance(&self, rx_port: usize) -> f32 {
        self.noise_variance[rx_port]
    }

    /// Noise variances of all receive ports
    pub fn noise_variances(&self) -> &[f32] {
        &self.noise_variance
    }

    pub fn set_noise_variance(&mut self, value: f32, rx_port: usize) {
        self.noise_variance[rx_port] = value;
    }

    pub fn rsrp(&self, rx_port: usize) -> f32 {
        self.rsrp[rx_port]
    }

    pub fn set_rsrp(&mut self, value: f32, rx_port: usize) {
        self.rsrp[rx_port] = value;
    }

    pub fn epre(&self, rx_port: usize) -> f32 {
        self.epre[rx_port]
    }

    pub fn set_epre(&mut self, value: f32, rx_port: usize) {
        self.epre[rx_port] = value;
    }

    pub fn snr(&self, rx_port: usize) -> f32 {
        self.snr[rx_port]
    }

    pub fn set_snr(&mut self, value: f32, rx_port: usize) {
        self.snr[rx_port] = value;
    }

    pub fn time_alignment(&self) -> Option<f32> {
        self.time_alignment
    }

    pub fn set_time_alignment(&mut self, value: f32) {
        self.time_alignment = Some(value);
    }

    /// Mean RSRP over all receive ports
    pub fn mean_rsrp(&self) -> f32 {
        mean(&self.rsrp)
    }

    /// Mean EPRE over all receive ports
    pub fn mean_epre(&self) -> f32 {
        mean(&self.epre)
    }

    /// Mean noise variance over all receive ports
    pub fn mean_noise_variance(&self) -> f32 {
        mean(&self.noise_variance)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_round_trip() {
        let dims = ChannelEstimateDimensions {
            nof_prb: 4,
            nof_symbols: 14,
            nof_rx_ports: 2,
            nof_tx_layers: 1,
        };
        let estimate = ChannelEstimate::new(dims);
        assert_eq!(estimate.dims(), dims);
        assert_eq!(estimate.symbol_coefficients(3, 1, 0).len(), 4 * NRE);
        assert_eq!(estimate.noise_variances().len(), 2);
    }

    #[test]
    fn test_coefficient_access() {
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: 2,
            nof_symbols: 14,
            nof_rx_ports: 2,
            nof_tx_layers: 1,
        });
        let value = Complex32::new(0.5, -0.25);
        estimate.set(value, 13, 6, 1, 0);
        assert_eq!(estimate.get(13, 6, 1, 0), value);
        assert_eq!(estimate.symbol_coefficients(6, 1, 0)[13], value);
        assert_eq!(estimate.get(13, 6, 0, 0), Complex32::new(0.0, 0.0));

        estimate.symbol_coefficients_mut(2, 0, 0).fill(Complex32::new(1.0, 0.0));
        assert_eq!(estimate.get(23, 2, 0, 0), Complex32::new(1.0, 0.0));
    }

    #[test]
    fn test_resize_keeps_matching_storage() {
        let dims = ChannelEstimateDimensions::default();
        let mut estimate = ChannelEstimate::new(dims);
        estimate.set_noise_variance(0.1, 0);
        estimate.set_time_alignment(1e-6);
        estimate.resize(dims);
        assert_eq!(estimate.noise_variance(0), 0.1);
        assert!(estimate.time_alignment().is_none());

        let larger = ChannelEstimateDimensions { nof_rx_ports: 4, ..dims };
        estimate.resize(larger);
        assert_eq!(estimate.dims(), larger);
        assert_eq!(estimate.noise_variance(0), 0.0);
    }

    #[test]
    fn test_port_means() {
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_rx_ports: 2,
            ..Default::default()
        });
        estimate.set_rsrp(1.0, 0);
        estimate.set_rsrp(3.0, 1);
        estimate.set_noise_variance(0.5, 0);
        estimate.set_noise_variance(1.5, 1);
        assert!((estimate.mean_rsrp() - 2.0).abs() < 1e-6);
        assert!((estimate.mean_noise_variance() - 1.0).abs() < 1e-6);
    }
}
