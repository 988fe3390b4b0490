//! PUCCH Format 4 demodulator
//!
//! Format 4 occupies a single PRB. Each data symbol carries 12 / N_SF
//! modulation symbols repeated N_SF times under an orthogonal cover code
//! before transform precoding (TS 38.211 Section 6.3.2.6.3), which lets up to
//! four UEs share the PRB.

use common::types::NRE;
use num_complex::Complex32;
use tracing::debug;

use super::config::Format4Configuration;
use super::csi::{error_vector_magnitude, post_equalization_sinr, ChannelStateInformation};
use super::equalization::scrambling_seed;
use super::format3::{dmrs_symbol_mask, TransformPrecodedReceiver, FORMAT3_MAX_NOF_SYMBOLS, FORMAT3_MIN_NOF_SYMBOLS};
use crate::phy::channel_estimate::ChannelEstimate;
use crate::phy::demodulation::demodulate_soft;
use crate::phy::equalizer::{ChannelEqualizer, EqualizerAlgorithm};
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{GoldSequenceGenerator, PseudoRandomGenerator};
use crate::LayerError;

/// Quarter turns 1, -j, -1, j
const QUARTER_TURNS: [Complex32; 4] = [
    Complex32::new(1.0, 0.0),
    Complex32::new(0.0, -1.0),
    Complex32::new(-1.0, 0.0),
    Complex32::new(0.0, 1.0),
];

/// Whether `occ_length` is a supported spreading factor
pub fn is_valid_occ_length(occ_length: usize) -> bool {
    matches!(occ_length, 2 | 4)
}

/// Orthogonal cover code w_n (TS 38.211 Tables 6.3.2.6.3-1 and 6.3.2.6.3-2)
///
/// Block `b` of 12 / N_SF subcarriers is rotated by exp(-j 2π n b / N_SF).
pub fn occ_sequence(occ_length: usize, occ_index: usize) -> [Complex32; NRE] {
    assert!(is_valid_occ_length(occ_length), "Invalid spreading factor {}", occ_length);
    assert!(
        occ_index < occ_length,
        "OCC index {} out of range for spreading factor {}",
        occ_index,
        occ_length
    );

    let block_len = NRE / occ_length;
    let step = 4 / occ_length;
    let mut sequence = [Complex32::new(0.0, 0.0); NRE];
    for (k, w) in sequence.iter_mut().enumerate() {
        *w = QUARTER_TURNS[(occ_index * (k / block_len) * step) % 4];
    }
    sequence
}

/// Undo the block-wise spreading of Format 4
///
/// Every 12 input values (one symbol) produce 12 / N_SF outputs:
/// d(k) = (1 / N_SF) Σ_b conj(w(bM + k)) y(bM + k) with M = 12 / N_SF.
/// The output noise variance is the sum of the input variances over N_SF².
pub fn inverse_blockwise_spreading(
    output: &mut [Complex32],
    output_noise: &mut [f32],
    input: &[Complex32],
    input_noise: &[f32],
    occ_length: usize,
    occ_index: usize,
) {
    let occ = occ_sequence(occ_length, occ_index);
    let block_len = NRE / occ_length;
    assert_eq!(input.len() % NRE, 0, "Input must hold whole symbols");
    assert_eq!(input.len(), input_noise.len(), "Input noise length mismatch");
    assert_eq!(output.len(), input.len() / occ_length, "Output length mismatch");
    assert_eq!(output.len(), output_noise.len(), "Output noise length mismatch");

    let scale = 1.0 / occ_length as f32;
    let noise_scale = scale * scale;
    for (((out, out_noise), y), y_noise) in output
        .chunks_exact_mut(block_len)
        .zip(output_noise.chunks_exact_mut(block_len))
        .zip(input.chunks_exact(NRE))
        .zip(input_noise.chunks_exact(NRE))
    {
        for k in 0..block_len {
            let mut acc = Complex32::new(0.0, 0.0);
            let mut noise = 0.0;
            for b in 0..occ_length {
                let i = b * block_len + k;
                acc += occ[i].conj() * y[i];
                noise += y_noise[i];
            }
            out[k] = acc * scale;
            out_noise[k] = noise * noise_scale;
        }
    }
}

/// PUCCH Format 4 demodulator
pub struct Format4Demodulator {
    receiver: TransformPrecodedReceiver,
    descrambler: Box<dyn PseudoRandomGenerator>,
    despread: Vec<Complex32>,
    despread_noise: Vec<f32>,
    soft_bits: Vec<f32>,
}

impl Format4Demodulator {
    pub fn new(equalizer: ChannelEqualizer, descrambler: Box<dyn PseudoRandomGenerator>) -> Result<Self, LayerError> {
        let receiver = TransformPrecodedReceiver::new(equalizer, 1)?;
        // Spreading factor 2 with QPSK bounds the output
        let max_nof_symbols = NRE / 2 * FORMAT3_MAX_NOF_SYMBOLS;
        Ok(Self {
            receiver,
            descrambler,
            despread: vec![Complex32::new(0.0, 0.0); max_nof_symbols],
            despread_noise: vec![0.0; max_nof_symbols],
            soft_bits: vec![0.0; max_nof_symbols * 2],
        })
    }

    /// Demodulate a Format 4 transmission into descrambled LLRs
    pub fn demodulate(
        &mut self,
        llrs: &mut [f32],
        csi: &mut ChannelStateInformation,
        grid: &dyn ResourceGridReader,
        estimate: &ChannelEstimate,
        config: &Format4Configuration,
    ) {
        let allocation = &config.allocation;
        assert!(
            (FORMAT3_MIN_NOF_SYMBOLS..=FORMAT3_MAX_NOF_SYMBOLS).contains(&allocation.nof_symbols),
            "Invalid Format 4 symbol count {}",
            allocation.nof_symbols
        );
        assert!(
            is_valid_occ_length(config.occ_length) && config.occ_index < config.occ_length,
            "Invalid Format 4 OCC {} of length {}",
            config.occ_index,
            config.occ_length
        );
        assert_eq!(
            llrs.len(),
            config.nof_coded_bits(),
            "LLR buffer does not match the Format 4 allocation"
        );

        let dmrs = dmrs_symbol_mask(allocation.nof_symbols, allocation.is_hopping(), config.additional_dmrs);
        let nof_re = self.receiver.receive(grid, estimate, allocation, &config.ports, 1, dmrs);

        let nof_symbols = nof_re / config.occ_length;
        inverse_blockwise_spreading(
            &mut self.despread[..nof_symbols],
            &mut self.despread_noise[..nof_symbols],
            self.receiver.symbols(nof_re),
            self.receiver.noise_vars(nof_re),
            config.occ_length,
            config.occ_index,
        );

        let modulation = config.modulation();
        let symbols = &self.despread[..nof_symbols];
        let noise_vars = &self.despread_noise[..nof_symbols];
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
            "Format 4 demodulation: rnti={:#x}, prb={}, symbols={}, occ={}/{}, {:?}, llrs={}",
            config.rnti.value(),
            allocation.starting_prb,
            allocation.nof_symbols,
            config.occ_index,
            config.occ_length,
            modulation,
            llrs.len()
        );
    }
}

impl Default for Format4Demodulator {
    fn default() -> Self {
        match Self::new(
            ChannelEqualizer::new(EqualizerAlgorithm::default()),
            Box::new(GoldSequenceGenerator::new(0)),
        ) {
            Ok(demodulator) => demodulator,
            Err(e) => panic!("Single PRB transform precoding is always valid: {}", e),
        }
    }
}

impl std::fmt::Debug for Format4Demodulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format4Demodulator")
            .field("equalizer", &self.receiver.equalizer())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::channel_estimate::ChannelEstimateDimensions;
    use crate::phy::demodulation::hard_decision;
    use crate::phy::pucch::config::{GroupHopping, PucchAllocation, UciPayloadSize};
    use crate::phy::pucch::csi::SinrType;
    use crate::phy::pucch::modulator::PucchModulator;
    use crate::phy::resource_grid::ResourceGrid;
    use common::types::{CyclicPrefix, Rnti, SlotPoint};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(nof_symbols: usize, occ_length: usize, occ_index: usize, pi2_bpsk: bool) -> Format4Configuration {
        Format4Configuration {
            allocation: PucchAllocation {
                slot: SlotPoint::default(),
                cp: CyclicPrefix::Normal,
                bwp_start_rb: 5,
                bwp_size_rb: 20,
                starting_prb: 3,
                second_hop_prb: None,
                start_symbol_index: 0,
                nof_symbols,
            },
            rnti: Rnti(0x0042),
            n_id: 12,
            n_id_hopping: 12,
            group_hopping: GroupHopping::Neither,
            pi2_bpsk,
            additional_dmrs: false,
            occ_length,
            occ_index,
            uci: UciPayloadSize {
                nof_harq_ack: 1,
                nof_csi_part1: 6,
                ..Default::default()
            },
            ports: vec![0],
        }
    }

    fn flat_estimate(gain: Complex32, noise_var: f32) -> ChannelEstimate {
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: 1,
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
    fn test_occ_tables() {
        let sf2 = occ_sequence(2, 1);
        assert!(sf2[..6].iter().all(|&w| w == Complex32::new(1.0, 0.0)));
        assert!(sf2[6..].iter().all(|&w| w == Complex32::new(-1.0, 0.0)));

        let sf4 = occ_sequence(4, 1);
        assert_eq!(sf4[3], Complex32::new(0.0, -1.0));
        assert_eq!(sf4[6], Complex32::new(-1.0, 0.0));
        assert_eq!(sf4[9], Complex32::new(0.0, 1.0));
        let sf4 = occ_sequence(4, 3);
        assert_eq!(sf4[3], Complex32::new(0.0, 1.0));
        assert_eq!(sf4[11], Complex32::new(0.0, -1.0));

        // Distinct codes are orthogonal
        for a in 0..4 {
            for b in 0..4 {
                let wa = occ_sequence(4, a);
                let wb = occ_sequence(4, b);
                let dot: Complex32 = wa.iter().zip(wb.iter()).map(|(x, y)| x * y.conj()).sum();
                let expected = if a == b { NRE as f32 } else { 0.0 };
                assert!((dot - expected).norm() < 1e-6);
            }
        }
    }

    #[test]
    fn test_inverse_spreading_recovers_symbols() {
        let data: Vec<Complex32> = (0..6)
            .map(|i| Complex32::new(0.1 * i as f32 - 0.2, 0.3 - 0.05 * i as f32))
            .collect();
        let occ = occ_sequence(2, 1);
        let spread: Vec<Complex32> = (0..NRE).map(|k| occ[k] * data[k % 6]).collect();
        let noise = vec![0.5f32; NRE];

        let mut output = vec![Complex32::new(0.0, 0.0); 6];
        let mut output_noise = vec![0.0f32; 6];
        inverse_blockwise_spreading(&mut output, &mut output_noise, &spread, &noise, 2, 1);

        for (out, expected) in output.iter().zip(data.iter()) {
            assert!((out - expected).norm() < 1e-5);
        }
        assert!(output_noise.iter().all(|&n| (n - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_other_code_is_rejected() {
        let data = [Complex32::new(1.0, 1.0); 3];
        let occ = occ_sequence(4, 2);
        let spread: Vec<Complex32> = (0..NRE).map(|k| occ[k] * data[k % 3]).collect();

        let mut output = [Complex32::new(0.0, 0.0); 3];
        let mut output_noise = [0.0f32; 3];
        inverse_blockwise_spreading(&mut output, &mut output_noise, &spread, &[1.0; NRE], 4, 1);
        assert!(output.iter().all(|s| s.norm() < 1e-6));
    }

    #[test]
    fn test_loopback() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut modulator = PucchModulator::new().unwrap();
        let mut demodulator = Format4Demodulator::default();
        let gain = Complex32::new(-0.3, 0.8);

        for (nof_symbols, occ_length, occ_index, pi2_bpsk) in [(4, 2, 1, false), (14, 4, 3, true), (9, 4, 0, false)] {
            let config = config(nof_symbols, occ_length, occ_index, pi2_bpsk);
            let bits: Vec<u8> = (0..config.nof_coded_bits()).map(|_| rng.gen_range(0..2)).collect();
            let mut grid = ResourceGrid::new(1, 14, 25);
            modulator.modulate_format4(&mut grid, &config, &bits, &[gain]);

            let estimate = flat_estimate(gain, 0.01);
            let mut llrs = vec![0.0f32; bits.len()];
            let mut csi = ChannelStateInformation::new(SinrType::PostEqualization);
            demodulator.demodulate(&mut llrs, &mut csi, &grid, &estimate, &config);

            let mut decided = vec![0u8; llrs.len()];
            hard_decision(&mut decided, &llrs);
            assert_eq!(decided, bits, "symbols {} occ {}/{}", nof_symbols, occ_index, occ_length);
            assert!(csi.sinr_db().unwrap() > 15.0);
        }
    }

    #[test]
    #[should_panic]
    fn test_occ_index_out_of_range_is_fatal() {
        occ_sequence(2, 2);
    }
}
