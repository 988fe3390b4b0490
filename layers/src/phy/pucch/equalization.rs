//! Data resource element buffers shared by the Format 2, 3 and 4 demodulators
//!
//! Gathers the data resource elements of an allocation together with their
//! channel coefficients, then equalizes them in one pass.

use common::types::{MAX_PORTS, NRE};
use ndarray::{s, Array2, Array3, ArrayViewMut1, Axis};
use num_complex::Complex32;

use super::config::PucchAllocation;
use crate::phy::channel_estimate::ChannelEstimate;
use crate::phy::equalizer::ChannelEqualizer;
use crate::phy::resource_grid::ResourceGridReader;

/// Preallocated per-instance buffers for the data resource elements
#[derive(Debug, Clone)]
pub(super) struct ReBuffers {
    /// Received resource elements [re, port]
    rx: Array2<Complex32>,
    /// Channel coefficients [re, port, layer]
    channel: Array3<Complex32>,
    symbols: Vec<Complex32>,
    noise_vars: Vec<f32>,
}

impl ReBuffers {
    pub fn new(max_nof_re: usize) -> Self {
        Self {
            rx: Array2::zeros((max_nof_re, MAX_PORTS)),
            channel: Array3::zeros((max_nof_re, MAX_PORTS, 1)),
            symbols: vec![Complex32::new(0.0, 0.0); max_nof_re],
            noise_vars: vec![0.0; max_nof_re],
        }
    }

    /// Gather the data resource elements of `data_symbols`
    ///
    /// `keep_subcarrier` selects the data subcarriers within the allocation.
    /// Returns the number of resource elements gathered per port.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        &mut self,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        allocation: &PucchAllocation,
        ports: &[usize],
        nof_prb: usize,
        data_symbols: impl Iterator<Item = usize>,
        keep_subcarrier: impl Fn(usize) -> bool,
    ) -> usize {
        let nof_sc = nof_prb * NRE;
        let dims = estimate.dims();
        assert!(
            (1..=MAX_PORTS).contains(&ports.len()),
            "Invalid number of receive ports {}",
            ports.len()
        );
        assert_eq!(dims.nof_rx_ports, ports.len(), "Channel estimate port count mismatch");
        assert!(
            dims.nof_symbols >= allocation.nof_symbols && dims.nof_prb >= nof_prb,
            "Channel estimate {:?} smaller than the allocation",
            dims
        );

        let mut offset = 0;
        for symbol in data_symbols {
            let hop = allocation.hop_of_symbol(symbol);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            let slot_symbol = allocation.slot_symbol(symbol);

            let mut count = 0;
            for (port_index, &port) in ports.iter().enumerate() {
                let view = grid.get_view(port, slot_symbol);
                assert!(
                    first_subcarrier + nof_sc <= view.len(),
                    "Allocation of {} subcarriers at {} exceeds the grid width {}",
                    nof_sc,
                    first_subcarrier,
                    view.len()
                );
                let rx = &view[first_subcarrier..first_subcarrier + nof_sc];
                let channel = estimate.symbol_coefficients(symbol, port_index, 0);

                count = 0;
                for k in (0..nof_sc).filter(|&k| keep_subcarrier(k)) {
                    self.rx[[offset + count, port_index]] = rx[k];
                    self.channel[[offset + count, port_index, 0]] = channel[k];
                    count += 1;
                }
            }
            offset += count;
        }
        offset
    }

    /// Equalize the first `nof_re` gathered resource elements
    pub fn equalize(&mut self, equalizer: &ChannelEqualizer, nof_re: usize, port_noise_vars: &[f32]) {
        let nof_ports = port_noise_vars.len();
        equalizer.equalize(
            ArrayViewMut1::from(&mut self.symbols[..nof_re]).insert_axis(Axis(1)),
            ArrayViewMut1::from(&mut self.noise_vars[..nof_re]).insert_axis(Axis(1)),
            self.rx.slice(s![..nof_re, ..nof_ports]),
            self.channel.slice(s![..nof_re, ..nof_ports, ..]),
            port_noise_vars,
            1.0,
        );
    }

    pub fn symbols(&self, nof_re: usize) -> &[Complex32] {
        &self.symbols[..nof_re]
    }

    pub fn noise_vars(&self, nof_re: usize) -> &[f32] {
        &self.noise_vars[..nof_re]
    }
}

/// Scrambling seed c_init = n_RNTI * 2^15 + n_ID (TS 38.211 Section 6.3.2.5.1)
pub(super) fn scrambling_seed(rnti: u16, n_id: u32) -> u32 {
    ((rnti as u32) << 15) + n_id
}
