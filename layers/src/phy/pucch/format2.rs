//! PUCCH Format 2 demodulator
//!
//! Format 2 maps QPSK symbols on 8 of every 12 subcarriers of 1 to 16 PRB
//! over one or two symbols; the remaining subcarriers (k mod 3 = 1) carry
//! the DM-RS (TS 38.211 Section 6.4.1.3.2).

use common::types::NRE;
use tracing::debug;

use super::config::Format2Configuration;
use super::csi::{error_vector_magnitude, post_equalization_sinr, ChannelStateInformation};
use super::equalization::{scrambling_seed, ReBuffers};
use crate::phy::channel_estimate::ChannelEstimate;
use crate::phy::demodulation::{demodulate_soft, Modulation};
use crate::phy::equalizer::{ChannelEqualizer, EqualizerAlgorithm};
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{GoldSequenceGenerator, PseudoRandomGenerator};

/// Maximum number of PRB of a Format 2 allocation
pub const FORMAT2_MAX_NOF_PRB: usize = 16;

/// Maximum number of OFDM symbols of a Format 2 allocation
pub const FORMAT2_MAX_NOF_SYMBOLS: usize = 2;

/// Whether subcarrier `k` of a Format 2 allocation carries DM-RS
pub fn is_dmrs_subcarrier(k: usize) -> bool {
    k % 3 == 1
}

/// PUCCH Format 2 demodulator
pub struct Format2Demodulator {
    equalizer: ChannelEqualizer,
    descrambler: Box<dyn PseudoRandomGenerator>,
    buffers: ReBuffers,
    soft_bits: Vec<f32>,
}

impl Format2Demodulator {
    pub fn new(equalizer: ChannelEqualizer, descrambler: Box<dyn PseudoRandomGenerator>) -> Self {
        let max_nof_re = FORMAT2_MAX_NOF_PRB * (NRE - NRE / 3) * FORMAT2_MAX_NOF_SYMBOLS;
        Self {
            equalizer,
            descrambler,
            buffers: ReBuffers::new(max_nof_re),
            soft_bits: vec![0.0; max_nof_re * Modulation::Qpsk.bits_per_symbol()],
        }
    }

    /// Demodulate a Format 2 transmission into descrambled LLRs
    ///
    /// `llrs` must hold exactly the number of coded bits of the allocation.
    pub fn demodulate(
        &mut self,
        llrs: &mut [f32],
        csi: &mut ChannelStateInformation,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        config: &Format2Configuration,
    ) {
        let allocation = &config.allocation;
        assert!(
            (1..=FORMAT2_MAX_NOF_PRB).contains(&config.nof_prb),
            "Invalid Format 2 PRB count {}",
            config.nof_prb
        );
        assert!(
            (1..=FORMAT2_MAX_NOF_SYMBOLS).contains(&allocation.nof_symbols),
            "Invalid Format 2 symbol count {}",
            allocation.nof_symbols
        );
        assert_eq!(
            llrs.len(),
            config.nof_coded_bits(),
            "LLR buffer does not match the Format 2 allocation"
        );

        let nof_re = self.buffers.load(
            grid,
            estimate,
            allocation,
            &config.ports,
            config.nof_prb,
            0..allocation.nof_symbols,
            |k| !is_dmrs_subcarrier(k),
        );
        assert_eq!(nof_re, config.nof_data_re(), "Unexpected number of data resource elements");

        self.buffers
            .equalize(&self.equalizer, nof_re, &estimate.noise_variances()[..config.ports.len()]);

        let symbols = self.buffers.symbols(nof_re);
        let noise_vars = self.buffers.noise_vars(nof_re);
        let soft_bits = &mut self.soft_bits[..llrs.len()];
        demodulate_soft(soft_bits, symbols, noise_vars, Modulation::Qpsk);

        self.descrambler.init(scrambling_seed(config.rnti.value(), config.n_id));
        self.descrambler.apply_xor_llr(llrs, soft_bits);

        if let Some(sinr) = post_equalization_sinr(noise_vars) {
            csi.set_sinr_post_eq(sinr);
        }
        if let Some(evm) = error_vector_magnitude(symbols, noise_vars, Modulation::Qpsk) {
            csi.set_evm(evm);
        }

        debug!(
            "Format 2 demodulation: rnti={:#x}, prb={}+{}, symbols={}, llrs={}",
            config.rnti.value(),
            allocation.starting_prb,
            config.nof_prb,
            allocation.nof_symbols,
            llrs.len()
        );
    }
}

impl Default for Format2Demodulator {
    fn default() -> Self {
        Self::new(
            ChannelEqualizer::new(EqualizerAlgorithm::default()),
            Box::new(GoldSequenceGenerator::new(0)),
        )
    }
}

impl std::fmt::Debug for Format2Demodulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format2Demodulator")
            .field("equalizer", &self.equalizer)
            .finish_non_exhaustive()
    }
}
