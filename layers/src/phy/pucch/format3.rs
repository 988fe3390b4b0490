//! PUCCH Format 3 demodulator
//!
//! Format 3 carries transform-precoded QPSK or π/2-BPSK symbols over 1 to 16
//! PRB and 4 to 14 symbols. Whole symbols are reserved for DM-RS (TS 38.211
//! Table 6.4.1.3.3.2-1). The transform-precoded receive chain defined here is
//! shared with Format 4.

use common::types::NRE;
use num_complex::Complex32;
use tracing::debug;

use super::config::{Format3Configuration, PucchAllocation};
use super::csi::{error_vector_magnitude, post_equalization_sinr, ChannelStateInformation};
use super::equalization::{scrambling_seed, ReBuffers};
use crate::phy::channel_estimate::ChannelEstimate;
use crate::phy::demodulation::demodulate_soft;
use crate::phy::equalizer::{ChannelEqualizer, EqualizerAlgorithm};
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{GoldSequenceGenerator, PseudoRandomGenerator};
use crate::phy::transform_precoder::{is_valid_nof_prb, TransformPrecoder};
use crate::LayerError;

/// Maximum number of PRB of a Format 3 allocation
pub const FORMAT3_MAX_NOF_PRB: usize = 16;

/// Minimum number of OFDM symbols of a Format 3 or 4 allocation
pub const FORMAT3_MIN_NOF_SYMBOLS: usize = 4;

/// Maximum number of OFDM symbols of a Format 3 or 4 allocation
pub const FORMAT3_MAX_NOF_SYMBOLS: usize = 14;

bitflags::bitflags! {
    /// Symbols of a PUCCH allocation carrying DM-RS, relative to its first symbol
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DmrsSymbolMask: u16 {
        const SYMBOL_0 = 1 << 0;
        const SYMBOL_1 = 1 << 1;
        const SYMBOL_2 = 1 << 2;
        const SYMBOL_3 = 1 << 3;
        const SYMBOL_4 = 1 << 4;
        const SYMBOL_5 = 1 << 5;
        const SYMBOL_6 = 1 << 6;
        const SYMBOL_7 = 1 << 7;
        const SYMBOL_8 = 1 << 8;
        const SYMBOL_9 = 1 << 9;
        const SYMBOL_10 = 1 << 10;
        const SYMBOL_11 = 1 << 11;
        const SYMBOL_12 = 1 << 12;
        const SYMBOL_13 = 1 << 13;
    }
}

impl DmrsSymbolMask {
    /// Mask with the given relative symbols set
    pub fn from_symbols(symbols: &[usize]) -> Self {
        symbols
            .iter()
            .fold(Self::empty(), |mask, &symbol| mask | Self::from_bits_truncate(1 << symbol))
    }

    pub fn contains_symbol(&self, symbol: usize) -> bool {
        symbol < 16 && self.bits() & (1 << symbol) != 0
    }

    /// Number of DM-RS symbols
    pub fn nof_symbols(&self) -> usize {
        self.bits().count_ones() as usize
    }
}

/// DM-RS symbols of a Format 3 or 4 allocation (TS 38.211 Table 6.4.1.3.3.2-1)
pub fn dmrs_symbol_mask(nof_symbols: usize, hopping: bool, additional_dmrs: bool) -> DmrsSymbolMask {
    let symbols: &[usize] = match (nof_symbols, additional_dmrs) {
        (4, _) if hopping => &[0, 2],
        (4, _) => &[1],
        (5, _) => &[0, 3],
        (6, _) | (7, _) => &[1, 4],
        (8, _) => &[1, 5],
        (9, _) => &[1, 6],
        (10, false) | (11, false) => &[2, 7],
        (10, true) => &[1, 3, 6, 8],
        (11, true) => &[1, 3, 6, 9],
        (12, false) => &[2, 8],
        (12, true) => &[1, 4, 7, 10],
        (13, false) => &[2, 9],
        (13, true) => &[1, 4, 7, 11],
        (14, false) => &[3, 10],
        (14, true) => &[1, 5, 8, 12],
        _ => panic!("Invalid number of symbols {} for PUCCH Format 3/4", nof_symbols),
    };
    DmrsSymbolMask::from_symbols(symbols)
}

/// Equalization and transform deprecoding of the data symbols of a Format 3 or 4 allocation
pub(super) struct TransformPrecodedReceiver {
    equalizer: ChannelEqualizer,
    precoder: TransformPrecoder,
    buffers: ReBuffers,
    deprecoded: Vec<Complex32>,
    deprecoded_noise: Vec<f32>,
}

impl TransformPrecodedReceiver {
    pub fn new(equalizer: ChannelEqualizer, max_nof_prb: usize) -> Result<Self, LayerError> {
        let max_nof_re = max_nof_prb * NRE * FORMAT3_MAX_NOF_SYMBOLS;
        Ok(Self {
            equalizer,
            precoder: TransformPrecoder::new(max_nof_prb)?,
            buffers: ReBuffers::new(max_nof_re),
            deprecoded: vec![Complex32::new(0.0, 0.0); max_nof_re],
            deprecoded_noise: vec![0.0; max_nof_re],
        })
    }

    pub fn equalizer(&self) -> ChannelEqualizer {
        self.equalizer
    }

    /// Equalize and deprecode every data symbol, returning the number of resource elements
    pub fn receive(
        &mut self,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        allocation: &PucchAllocation,
        ports: &[usize],
        nof_prb: usize,
        dmrs: DmrsSymbolMask,
    ) -> usize {
        let nof_sc = nof_prb * NRE;
        let data_symbols = (0..allocation.nof_symbols).filter(|&symbol| !dmrs.contains_symbol(symbol));
        let nof_re = self
            .buffers
            .load(grid, estimate, allocation, ports, nof_prb, data_symbols, |_| true);
        assert_eq!(
            nof_re,
            (allocation.nof_symbols - dmrs.nof_symbols()) * nof_sc,
            "Unexpected number of data resource elements"
        );

        self.buffers
            .equalize(&self.equalizer, nof_re, &estimate.noise_variances()[..ports.len()]);

        let symbols = self.buffers.symbols(nof_re);
        let noise_vars = self.buffers.noise_vars(nof_re);
        for ((out, out_noise), (input, input_noise)) in self.deprecoded[..nof_re]
            .chunks_exact_mut(nof_sc)
            .zip(self.deprecoded_noise[..nof_re].chunks_exact_mut(nof_sc))
            .zip(symbols.chunks_exact(nof_sc).zip(noise_vars.chunks_exact(nof_sc)))
        {
            self.precoder.deprecode_symbol(out, input);
            TransformPrecoder::deprecode_noise(out_noise, input_noise);
        }

        nof_re
    }

    pub fn symbols(&self, nof_re: usize) -> &[Complex32] {
        &self.deprecoded[..nof_re]
    }

    pub fn noise_vars(&self, nof_re: usize) -> &[f32] {
        &self.deprecoded_noise[..nof_re]
    }
}

/// PUCCH Format 3 demodulator
pub struct Format3Demodulator {
    receiver: TransformPrecodedReceiver,
    descrambler: Box<dyn PseudoRandomGenerator>,
    soft_bits: Vec<f32>,
}

impl Format3Demodulator {
    pub fn new(equalizer: ChannelEqualizer, descrambler: Box<dyn PseudoRandomGenerator>) -> Result<Self, LayerError> {
        let receiver = TransformPrecodedReceiver::new(equalizer, FORMAT3_MAX_NOF_PRB)?;
        // QPSK over every resource element bounds the number of coded bits
        let max_nof_bits = FORMAT3_MAX_NOF_PRB * NRE * FORMAT3_MAX_NOF_SYMBOLS * 2;
        Ok(Self {
            receiver,
            descrambler,
            soft_bits: vec![0.0; max_nof_bits],
        })
    }

    /// Demodulate a Format 3 transmission into descrambled LLRs
    pub fn demodulate(
        &mut self,
        llrs: &mut [f32],
        csi: &mut ChannelStateInformation,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        config: &Format3Configuration,
    ) {
        let allocation = &config.allocation;
        assert!(
            config.nof_prb <= FORMAT3_MAX_NOF_PRB && is_valid_nof_prb(config.nof_prb),
            "Invalid Format 3 PRB count {}",
            config.nof_prb
        );
        assert!(
            (FORMAT3_MIN_NOF_SYMBOLS..=FORMAT3_MAX_NOF_SYMBOLS).contains(&allocation.nof_symbols),
            "Invalid Format 3 symbol count {}",
            allocation.nof_symbols
        );
        assert_eq!(
            llrs.len(),
            config.nof_coded_bits(),
            "LLR buffer does not match the Format 3 allocation"
        );

        let dmrs = dmrs_symbol_mask(allocation.nof_symbols, allocation.is_hopping(), config.additional_dmrs);
        let nof_re = self
            .receiver
            .receive(grid, estimate, allocation, &config.ports, config.nof_prb, dmrs);

        let modulation = config.modulation();
        let symbols = self.receiver.symbols(nof_re);
        let noise_vars = self.receiver.noise_vars(nof_re);
        let soft_bits = &mut self.soft_bits[..llrs.len()];
        demodulate_soft(soft_bits, symbols, noise_vars, modulation);

        self.descrambler.init(scrambling_seed(config.rnti.value(), config.n_id));
        self.descrambler.apply_xor_llr(llrs, soft_bits);

        if let Some(sinr) = post_equalization_sinr(noise_vars) {
            csi.set_sinr_post_eq(sinr);
        }
        if let Some(evm) = error_vector_magnitude(symbols, noise_vars, modulation) {
            csi.set_evm(evm);
        }

        debug!(
            "Format 3 demodulation: rnti={:#x}, prb={}+{}, symbols={}, dmrs={:?}, {:?}, llrs={}",
            config.rnti.value(),
            allocation.starting_prb,
            config.nof_prb,
            allocation.nof_symbols,
            dmrs,
            modulation,
            llrs.len()
        );
    }
}

impl Default for Format3Demodulator {
    fn default() -> Self {
        match Self::new(
            ChannelEqualizer::new(EqualizerAlgorithm::default()),
            Box::new(GoldSequenceGenerator::new(0)),
        ) {
            Ok(demodulator) => demodulator,
            Err(e) => panic!("Format 3 bandwidth is always valid: {}", e),
        }
    }
}

impl std::fmt::Debug for Format3Demodulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format3Demodulator")
            .field("equalizer", &self.receiver.equalizer())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::channel_estimate::ChannelEstimateDimensions;
    use crate::phy::demodulation::hard_decision;
    use crate::phy::pucch::config::{GroupHopping, UciPayloadSize};
    use crate::phy::pucch::csi::SinrType;
    use crate::phy::pucch::modulator::PucchModulator;
    use crate::phy::resource_grid::ResourceGrid;
    use common::types::{CyclicPrefix, Rnti, SlotPoint};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(nof_prb: usize, nof_symbols: usize, pi2_bpsk: bool, additional_dmrs: bool) -> Format3Configuration {
        Format3Configuration {
            allocation: PucchAllocation {
                slot: SlotPoint::default(),
                cp: CyclicPrefix::Normal,
                bwp_start_rb: 0,
                bwp_size_rb: 52,
                starting_prb: 10,
                second_hop_prb: Some(30),
                start_symbol_index: 14 - nof_symbols,
                nof_symbols,
            },
            nof_prb,
            rnti: Rnti(0x1234),
            n_id: 77,
            n_id_hopping: 77,
            group_hopping: GroupHopping::Neither,
            pi2_bpsk,
            additional_dmrs,
            uci: UciPayloadSize {
                nof_harq_ack: 2,
                nof_csi_part1: 20,
                ..Default::default()
            },
            ports: vec![0],
        }
    }

    fn flat_estimate(nof_prb: usize, gain: Complex32, noise_var: f32) -> ChannelEstimate {
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb,
            nof_symbols: 14,
            nof_rx_ports: 1,
            nof_tx_layers: 1,
        });
        for symbol in 0..14 {
            estimate.symbol_coefficients_mut(symbol, 0, 0).fill(gain);
        }
        estimate.set_noise_variance(noise_var, 0);
        estimate
    }

    #[test]
    fn test_dmrs_symbol_mask_table() {
        assert_eq!(dmrs_symbol_mask(4, false, false), DmrsSymbolMask::SYMBOL_1);
        assert_eq!(dmrs_symbol_mask(4, true, true), DmrsSymbolMask::SYMBOL_0 | DmrsSymbolMask::SYMBOL_2);
        assert_eq!(dmrs_symbol_mask(5, true, false), DmrsSymbolMask::from_symbols(&[0, 3]));
        assert_eq!(dmrs_symbol_mask(11, false, false), DmrsSymbolMask::from_symbols(&[2, 7]));
        assert_eq!(dmrs_symbol_mask(14, false, true), DmrsSymbolMask::from_symbols(&[1, 5, 8, 12]));

        for nof_symbols in 4..=14 {
            for additional in [false, true] {
                let mask = dmrs_symbol_mask(nof_symbols, false, additional);
                assert!(mask.nof_symbols() >= 1);
                assert!((0..16).filter(|&s| mask.contains_symbol(s)).all(|s| s < nof_symbols));
            }
        }
    }

    #[test]
    fn test_loopback_qpsk_and_pi2_bpsk() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut modulator = PucchModulator::new().unwrap();
        let mut demodulator = Format3Demodulator::new(
            ChannelEqualizer::new(EqualizerAlgorithm::ZeroForcing),
            Box::new(GoldSequenceGenerator::new(0)),
        )
        .unwrap();
        let gain = Complex32::new(0.5, -0.5);

        for (nof_prb, nof_symbols, pi2_bpsk, additional_dmrs) in [(1, 4, false, false), (3, 14, true, true), (16, 10, false, true)] {
            let config = config(nof_prb, nof_symbols, pi2_bpsk, additional_dmrs);
            let bits: Vec<u8> = (0..config.nof_coded_bits()).map(|_| rng.gen_range(0..2)).collect();
            let mut grid = ResourceGrid::new(1, 14, 52);
            modulator.modulate_format3(&mut grid, &config, &bits, &[gain]);

            let estimate = flat_estimate(nof_prb, gain, 0.001);
            let mut llrs = vec![0.0f32; bits.len()];
            let mut csi = ChannelStateInformation::new(SinrType::Evm);
            demodulator.demodulate(&mut llrs, &mut csi, &grid, &estimate, &config);

            let mut decided = vec![0u8; llrs.len()];
            hard_decision(&mut decided, &llrs);
            assert_eq!(decided, bits, "nof_prb {} nof_symbols {}", nof_prb, nof_symbols);
            assert!(csi.evm().unwrap() < 1e-3);
        }
    }

    #[test]
    #[should_panic]
    fn test_invalid_prb_count_is_fatal() {
        let config = config(7, 4, false, false);
        let grid = ResourceGrid::new(1, 14, 52);
        let estimate = flat_estimate(7, Complex32::new(1.0, 0.0), 1.0);
        let mut demodulator = Format3Demodulator::default();
        let mut llrs = vec![0.0f32; 7 * NRE * 3 * 2];
        demodulator.demodulate(&mut llrs, &mut ChannelStateInformation::default(), &grid, &estimate, &config);
    }
}
