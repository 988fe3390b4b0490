//! Resource Grid for the uplink receiver
//!
//! Holds the frequency-domain samples of one slot for every receive port and
//! exposes the read-only accessor the PUCCH detectors and demodulators consume.

use common::types::{MAX_NSYMB_PER_SLOT, NRE};
use ndarray::Array3;
use num_complex::Complex32;
use tracing::debug;

/// Read-only access to a resource grid
///
/// Bounds are the caller's responsibility and are asserted, not clamped.
pub trait ResourceGridReader {
    /// Number of receive ports
    fn nof_ports(&self) -> usize;

    /// Number of subcarriers
    fn nof_subc(&self) -> usize;

    /// Number of OFDM symbols
    fn nof_symbols(&self) -> usize;

    /// Copy `destination.len()` contiguous samples starting at `first_subcarrier`
    fn get(&self, destination: &mut [Complex32], port: usize, symbol: usize, first_subcarrier: usize);

    /// View all subcarriers of one OFDM symbol
    fn get_view(&self, port: usize, symbol: usize) -> &[Complex32];
}

/// Resource grid for one slot
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 3D grid: [port, symbol, subcarrier]
    grid: Array3<Complex32>,
}

impl ResourceGrid {
    /// Create a zeroed resource grid
    pub fn new(nof_ports: usize, nof_symbols: usize, nof_prb: usize) -> Self {
        assert!(nof_ports > 0, "The grid needs at least one port");
        assert!(
            nof_symbols > 0 && nof_symbols <= MAX_NSYMB_PER_SLOT,
            "Invalid number of symbols {}",
            nof_symbols
        );
        let nof_subc = nof_prb * NRE;
        debug!(
            "Creating resource grid with dimensions: ({}, {}, {})",
            nof_ports, nof_symbols, nof_subc
        );

        Self {
            grid: Array3::zeros((nof_ports, nof_symbols, nof_subc)),
        }
    }

    /// Number of resource blocks
    pub fn nof_prb(&self) -> usize {
        self.nof_subc() / NRE
    }

    /// Clear the entire grid
    pub fn set_all_zero(&mut self) {
        self.grid.fill(Complex32::new(0.0, 0.0));
    }

    /// Write a single resource element
    pub fn put_re(&mut self, port: usize, symbol: usize, subcarrier: usize, value: Complex32) {
        self.grid[(port, symbol, subcarrier)] = value;
    }

    /// Write contiguous samples starting at `first_subcarrier`
    pub fn put(&mut self, port: usize, symbol: usize, first_subcarrier: usize, values: &[Complex32]) {
        let view = self.symbol_mut(port, symbol);
        assert!(
            first_subcarrier + values.len() <= view.len(),
            "Write of {} samples at subcarrier {} exceeds the grid width {}",
            values.len(),
            first_subcarrier,
            view.len()
        );
        view[first_subcarrier..first_subcarrier + values.len()].copy_from_slice(values);
    }

    /// Read a single resource element
    pub fn get_re(&self, port: usize, symbol: usize, subcarrier: usize) -> Complex32 {
        self.grid[(port, symbol, subcarrier)]
    }

    fn symbol_mut(&mut self, port: usize, symbol: usize) -> &mut [Complex32] {
        let nof_ports = self.nof_ports();
        let nof_symbols = self.nof_symbols();
        assert!(port < nof_ports, "Port {} out of bounds ({})", port, nof_ports);
        assert!(symbol < nof_symbols, "Symbol {} out of bounds ({})", symbol, nof_symbols);
        self.grid
            .slice_mut(ndarray::s![port, symbol, ..])
            .into_slice()
            .expect("grid rows are contiguous in standard layout")
    }
}

impl ResourceGridReader for ResourceGrid {
    fn nof_ports(&self) -> usize {
        self.grid.dim().0
    }

    fn nof_subc(&self) -> usize {
        self.grid.dim().2
    }

    fn nof_symbols(&self) -> usize {
        self.grid.dim().1
    }

    fn get(&self, destination: &mut [Complex32], port: usize, symbol: usize, first_subcarrier: usize) {
        let view = self.get_view(port, symbol);
        assert!(
            first_subcarrier + destination.len() <= view.len(),
            "Read of {} samples at subcarrier {} exceeds the grid width {}",
            destination.len(),
            first_subcarrier,
            view.len()
        );
        destination.copy_from_slice(&view[first_subcarrier..first_subcarrier + destination.len()]);
    }

    fn get_view(&self, port: usize, symbol: usize) -> &[Complex32] {
        assert!(port < self.nof_ports(), "Port {} out of bounds ({})", port, self.nof_ports());
        assert!(
            symbol < self.nof_symbols(),
            "Symbol {} out of bounds ({})",
            symbol,
            self.nof_symbols()
        );
        self.grid
            .slice(ndarray::s![port, symbol, ..])
            .to_slice()
            .expect("grid rows are contiguous in standard layout")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_grid_creation() {
        let grid = ResourceGrid::new(2, 14, 52);
        assert_eq!(grid.nof_ports(), 2);
        assert_eq!(grid.nof_symbols(), 14);
        assert_eq!(grid.nof_subc(), 52 * NRE);
        assert_eq!(grid.nof_prb(), 52);
    }

    #[test]
    fn test_resource_element_mapping() {
        let mut grid = ResourceGrid::new(1, 14, 25);
        let value = Complex32::new(1.0, -0.5);
        grid.put_re(0, 3, 17, value);
        assert_eq!(grid.get_re(0, 3, 17), value);
        assert_eq!(grid.get_view(0, 3)[17], value);
    }

    #[test]
    fn test_contiguous_read_write() {
        let mut grid = ResourceGrid::new(2, 14, 10);
        let values: Vec<Complex32> = (0..NRE).map(|i| Complex32::new(i as f32, 0.0)).collect();
        grid.put(1, 5, 24, &values);

        let mut read = vec![Complex32::new(0.0, 0.0); NRE];
        grid.get(&mut read, 1, 5, 24);
        assert_eq!(read, values);

        // Other port untouched
        grid.get(&mut read, 0, 5, 24);
        assert!(read.iter().all(|v| v.norm_sqr() == 0.0));

        grid.set_all_zero();
        grid.get(&mut read, 1, 5, 24);
        assert!(read.iter().all(|v| v.norm_sqr() == 0.0));
    }

    #[test]
    #[should_panic]
    fn test_read_past_grid_width() {
        let grid = ResourceGrid::new(1, 14, 1);
        let mut read = vec![Complex32::new(0.0, 0.0); NRE];
        grid.get(&mut read, 0, 0, 1);
    }
}
