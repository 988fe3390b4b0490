//! PUCCH modulator
//!
//! Generates the PUCCH data resource elements of one UE on a resource grid, as
//! seen at the receiver after a flat channel. Used to drive the detectors
//! and demodulators in tests and in the link simulator.
//!
//! Every configured receive port gets its own complex gain and the signal is
//! added to the grid contents, so several UEs and noise can be superposed.
//! Formats 0 and 1 generate the complete transmission including the Format 1
//! DM-RS. Formats 2, 3 and 4 generate only the data resource elements; their
//! DM-RS belongs to the channel estimator.

use common::types::NRE;
use num_complex::Complex32;
use std::f32::consts::FRAC_1_SQRT_2;
use tracing::trace;

use super::config::{
    Format0Configuration, Format1Configuration, Format1MultiplexKey, Format2Configuration, Format3Configuration,
    Format4Configuration, PucchAllocation,
};
use super::equalization::scrambling_seed;
use super::format0::candidate_table;
use super::format1::{hop_layout, occ_coefficient};
use super::format2::is_dmrs_subcarrier;
use super::format3::{dmrs_symbol_mask, DmrsSymbolMask, FORMAT3_MAX_NOF_PRB};
use super::format4::occ_sequence;
use super::helper::PucchHelper;
use crate::phy::demodulation::Modulation;
use crate::phy::resource_grid::ResourceGrid;
use crate::phy::sequences::{GoldSequenceGenerator, LowPaprSequenceCollection, PseudoRandomGenerator, ShortLowPaprCollection};
use crate::phy::transform_precoder::TransformPrecoder;
use crate::LayerError;

/// PUCCH transmitter model for all formats
pub struct PucchModulator {
    helper: PucchHelper,
    sequences: ShortLowPaprCollection,
    scrambler: GoldSequenceGenerator,
    precoder: TransformPrecoder,
}

impl PucchModulator {
    pub fn new() -> Result<Self, LayerError> {
        Ok(Self {
            helper: PucchHelper::new(),
            sequences: ShortLowPaprCollection::new(),
            scrambler: GoldSequenceGenerator::new(0),
            precoder: TransformPrecoder::new(FORMAT3_MAX_NOF_PRB)?,
        })
    }

    /// Format 0: select the cyclic shift encoding `harq_ack` and `sr`
    ///
    /// Only the first `config.nof_harq_ack` entries of `harq_ack` are used. A
    /// negative SR without HARQ-ACK transmits nothing, as does a positive SR
    /// outside an SR opportunity without HARQ-ACK.
    pub fn modulate_format0(
        &mut self,
        grid: &mut ResourceGrid,
        config: &Format0Configuration,
        harq_ack: &[u8],
        sr: bool,
        gains: &[Complex32],
    ) {
        let nof_harq_ack = config.nof_harq_ack;
        let sr = sr && config.sr_opportunity;
        if nof_harq_ack == 0 && !sr {
            return;
        }
        assert!(harq_ack.len() >= nof_harq_ack, "Missing HARQ-ACK bits");
        check_gains(gains, &config.ports);

        let selected = candidate_table(nof_harq_ack, config.sr_opportunity)
            .iter()
            .find(|c| c.harq_ack[..nof_harq_ack] == harq_ack[..nof_harq_ack] && (c.sr == 1) == sr);
        let Some(selected) = selected else {
            panic!("No Format 0 cyclic shift for HARQ-ACK {:?} and SR {}", harq_ack, sr);
        };

        let allocation = &config.allocation;
        for symbol in 0..allocation.nof_symbols {
            let hop = allocation.hop_of_symbol(symbol);
            let slot_symbol = allocation.slot_symbol(symbol);
            let group = self
                .helper
                .sequence_group(config.group_hopping, &allocation.slot, hop as u32, config.n_id);
            let alpha = self.helper.alpha_index(
                &allocation.slot,
                allocation.cp,
                config.n_id,
                slot_symbol,
                config.initial_cyclic_shift,
                selected.m_cs,
            );
            let sequence = self.sequences.get(group.u, group.v, alpha);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);

            for (&port, &gain) in config.ports.iter().zip(gains.iter()) {
                for (k, &value) in sequence.iter().enumerate() {
                    accumulate(grid, port, slot_symbol, first_subcarrier + k, gain * value);
                }
            }
        }

        trace!("Format 0 modulation: m_cs={}", selected.m_cs);
    }

    /// Format 1: one multiplexed transmission identified by `key`
    ///
    /// No HARQ-ACK bits send a positive SR, one bit uses BPSK and two bits QPSK.
    pub fn modulate_format1(
        &mut self,
        grid: &mut ResourceGrid,
        config: &Format1Configuration,
        key: Format1MultiplexKey,
        bits: &[u8],
        gains: &[Complex32],
    ) {
        assert!(bits.len() <= 2, "Format 1 carries at most two bits");
        check_gains(gains, &config.ports);

        let d = match bits {
            [b0, b1] => Complex32::new(
                (1.0 - 2.0 * *b0 as f32) * FRAC_1_SQRT_2,
                (1.0 - 2.0 * *b1 as f32) * FRAC_1_SQRT_2,
            ),
            _ => {
                let amplitude = (1.0 - 2.0 * bits.first().copied().unwrap_or(0) as f32) * FRAC_1_SQRT_2;
                Complex32::new(amplitude, amplitude)
            }
        };

        let allocation = &config.allocation;
        let occ = key.time_domain_occ as usize;
        for hop in 0..allocation.nof_hops() {
            let (nof_dmrs, nof_data) = hop_layout(allocation, hop);
            let group = self
                .helper
                .sequence_group(config.group_hopping, &allocation.slot, hop as u32, config.n_id);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            let (mut m_dmrs, mut m_data) = (0, 0);

            for symbol in allocation.hop_symbols(hop) {
                let weight = if symbol % 2 == 0 {
                    m_dmrs += 1;
                    occ_coefficient(nof_dmrs, occ, m_dmrs - 1)
                } else {
                    m_data += 1;
                    occ_coefficient(nof_data, occ, m_data - 1) * d
                };
                let slot_symbol = allocation.slot_symbol(symbol);
                let alpha = self.helper.alpha_index(
                    &allocation.slot,
                    allocation.cp,
                    config.n_id,
                    slot_symbol,
                    key.initial_cyclic_shift,
                    0,
                );
                let sequence = self.sequences.get(group.u, group.v, alpha);

                for (&port, &gain) in config.ports.iter().zip(gains.iter()) {
                    for (k, &value) in sequence.iter().enumerate() {
                        accumulate(grid, port, slot_symbol, first_subcarrier + k, gain * weight * value);
                    }
                }
            }
        }
    }

    /// Format 2: scrambled QPSK on the data subcarriers
    pub fn modulate_format2(&mut self, grid: &mut ResourceGrid, config: &Format2Configuration, bits: &[u8], gains: &[Complex32]) {
        assert_eq!(bits.len(), config.nof_coded_bits(), "Bit count does not match the Format 2 allocation");
        check_gains(gains, &config.ports);

        let symbols = self.scramble_and_modulate(bits, config.rnti.value(), config.n_id, Modulation::Qpsk);
        let allocation = &config.allocation;
        let mut symbols = symbols.iter();
        for symbol in 0..allocation.nof_symbols {
            let hop = allocation.hop_of_symbol(symbol);
            let slot_symbol = allocation.slot_symbol(symbol);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            for k in (0..config.nof_prb * NRE).filter(|&k| !is_dmrs_subcarrier(k)) {
                let Some(&value) = symbols.next() else {
                    return;
                };
                for (&port, &gain) in config.ports.iter().zip(gains.iter()) {
                    accumulate(grid, port, slot_symbol, first_subcarrier + k, gain * value);
                }
            }
        }
    }

    /// Format 3: scrambled and transform-precoded data symbols
    pub fn modulate_format3(&mut self, grid: &mut ResourceGrid, config: &Format3Configuration, bits: &[u8], gains: &[Complex32]) {
        assert_eq!(bits.len(), config.nof_coded_bits(), "Bit count does not match the Format 3 allocation");
        check_gains(gains, &config.ports);

        let symbols = self.scramble_and_modulate(bits, config.rnti.value(), config.n_id, config.modulation());
        let allocation = &config.allocation;
        let dmrs = dmrs_symbol_mask(allocation.nof_symbols, allocation.is_hopping(), config.additional_dmrs);
        self.map_precoded(grid, allocation, dmrs, config.nof_prb, &symbols, &config.ports, gains);
    }

    /// Format 4: scrambled symbols spread with the OCC, then transform precoded
    pub fn modulate_format4(&mut self, grid: &mut ResourceGrid, config: &Format4Configuration, bits: &[u8], gains: &[Complex32]) {
        assert_eq!(bits.len(), config.nof_coded_bits(), "Bit count does not match the Format 4 allocation");
        check_gains(gains, &config.ports);

        let symbols = self.scramble_and_modulate(bits, config.rnti.value(), config.n_id, config.modulation());
        let occ = occ_sequence(config.occ_length, config.occ_index);
        let block_len = NRE / config.occ_length;
        let spread: Vec<Complex32> = symbols
            .chunks_exact(block_len)
            .flat_map(|block| (0..NRE).map(move |k| occ[k] * block[k % block_len]))
            .collect();

        let allocation = &config.allocation;
        let dmrs = dmrs_symbol_mask(allocation.nof_symbols, allocation.is_hopping(), config.additional_dmrs);
        self.map_precoded(grid, allocation, dmrs, 1, &spread, &config.ports, gains);
    }

    fn scramble_and_modulate(&mut self, bits: &[u8], rnti: u16, n_id: u32, modulation: Modulation) -> Vec<Complex32> {
        self.scrambler.init(scrambling_seed(rnti, n_id));
        let scrambled: Vec<u8> = bits.iter().map(|&bit| bit ^ self.scrambler.next_bit()).collect();
        let mut symbols = vec![Complex32::new(0.0, 0.0); bits.len() / modulation.bits_per_symbol()];
        modulation.modulate(&mut symbols, &scrambled);
        symbols
    }

    #[allow(clippy::too_many_arguments)]
    fn map_precoded(
        &mut self,
        grid: &mut ResourceGrid,
        allocation: &PucchAllocation,
        dmrs: DmrsSymbolMask,
        nof_prb: usize,
        symbols: &[Complex32],
        ports: &[usize],
        gains: &[Complex32],
    ) {
        let nof_sc = nof_prb * NRE;
        let mut precoded = vec![Complex32::new(0.0, 0.0); nof_sc];
        let data_symbols = (0..allocation.nof_symbols).filter(|&symbol| !dmrs.contains_symbol(symbol));

        for (symbol, chunk) in data_symbols.zip(symbols.chunks_exact(nof_sc)) {
            self.precoder.precode_symbol(&mut precoded, chunk);
            let hop = allocation.hop_of_symbol(symbol);
            let slot_symbol = allocation.slot_symbol(symbol);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            for (&port, &gain) in ports.iter().zip(gains.iter()) {
                for (k, &value) in precoded.iter().enumerate() {
                    accumulate(grid, port, slot_symbol, first_subcarrier + k, gain * value);
                }
            }
        }
    }
}

impl std::fmt::Debug for PucchModulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PucchModulator")
            .field("max_nof_prb", &self.precoder.max_nof_prb())
            .finish_non_exhaustive()
    }
}

fn check_gains(gains: &[Complex32], ports: &[usize]) {
    assert_eq!(gains.len(), ports.len(), "One channel gain per receive port is required");
}

fn accumulate(grid: &mut ResourceGrid, port: usize, symbol: usize, subcarrier: usize, value: Complex32) {
    let current = grid.get_re(port, symbol, subcarrier);
    grid.put_re(port, symbol, subcarrier, current + value);
}
