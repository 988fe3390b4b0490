//! PUCCH processor
//!
//! One entry point per format. Formats 0 and 1 go straight to their
//! detectors. Formats 2, 3 and 4 first obtain a channel estimate from the
//! DM-RS estimator, then demodulate the data into LLRs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::{
    Format0Configuration, Format1Configuration, Format2Configuration, Format3Configuration, Format4Configuration,
    PucchAllocation,
};
use super::csi::{ChannelStateInformation, SinrType};
use super::format0::Format0Detector;
use super::format1::{Format1BatchResult, Format1Detector};
use super::format2::Format2Demodulator;
use super::format3::Format3Demodulator;
use super::format4::Format4Demodulator;
use super::validator::PucchPduValidator;
use super::{PucchDemodulationResult, PucchDetectionResult};
use crate::phy::channel_estimate::{ChannelEstimate, ChannelEstimateDimensions};
use crate::phy::equalizer::{ChannelEqualizer, EqualizerAlgorithm};
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{GoldSequenceGenerator, ShortLowPaprCollection};
use crate::LayerError;

/// Configuration of the DM-RS to estimate
#[derive(Debug, Clone, Copy)]
pub enum PucchEstimateRequest<'a> {
    Format2(&'a Format2Configuration),
    Format3(&'a Format3Configuration),
    Format4(&'a Format4Configuration),
}

impl PucchEstimateRequest<'_> {
    pub fn allocation(&self) -> &PucchAllocation {
        match self {
            Self::Format2(config) => &config.allocation,
            Self::Format3(config) => &config.allocation,
            Self::Format4(config) => &config.allocation,
        }
    }

    pub fn ports(&self) -> &[usize] {
        match self {
            Self::Format2(config) => &config.ports,
            Self::Format3(config) => &config.ports,
            Self::Format4(config) => &config.ports,
        }
    }

    /// PRB per hop
    pub fn nof_prb(&self) -> usize {
        match self {
            Self::Format2(config) => config.nof_prb,
            Self::Format3(config) => config.nof_prb,
            Self::Format4(_) => 1,
        }
    }

    /// Estimate dimensions the demodulators expect
    pub fn dimensions(&self) -> ChannelEstimateDimensions {
        ChannelEstimateDimensions {
            nof_prb: self.nof_prb(),
            nof_symbols: self.allocation().nof_symbols,
            nof_rx_ports: self.ports().len(),
            nof_tx_layers: 1,
        }
    }
}

/// DM-RS based channel estimator for Formats 2, 3 and 4
///
/// Fills `estimate`, already sized by [`PucchEstimateRequest::dimensions`].
/// Symbols are relative to the allocation start and subcarriers relative to
/// the first PRB of the symbol's hop. The receive port index follows the
/// order of the configured ports.
pub trait PucchDmrsEstimator: Send {
    fn estimate(&mut self, estimate: &mut ChannelEstimate, grid: &dyn ResourceGridReader, request: PucchEstimateRequest<'_>);
}

/// Processor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PucchProcessorConfig {
    /// Equalizer used by Formats 2, 3 and 4
    #[serde(default)]
    pub equalizer: EqualizerAlgorithm,
    /// SINR reported by Formats 2, 3 and 4
    #[serde(default)]
    pub sinr_type: SinrType,
}

/// Uniform per-format processing interface, as served by the pool
pub trait PucchProcessing: Send {
    fn process_format0(&mut self, grid: &dyn ResourceGridReader, config: &Format0Configuration) -> PucchDetectionResult;

    fn process_format1(&mut self, grid: &dyn ResourceGridReader, config: &Format1Configuration) -> Format1BatchResult;

    fn process_format2(&mut self, grid: &dyn ResourceGridReader, config: &Format2Configuration) -> PucchDemodulationResult;

    fn process_format3(&mut self, grid: &dyn ResourceGridReader, config: &Format3Configuration) -> PucchDemodulationResult;

    fn process_format4(&mut self, grid: &dyn ResourceGridReader, config: &Format4Configuration) -> PucchDemodulationResult;
}

/// PUCCH processor owning one detector or demodulator per format
pub struct PucchProcessor {
    validator: PucchPduValidator,
    format0: Format0Detector,
    format1: Format1Detector,
    format2: Format2Demodulator,
    format3: Format3Demodulator,
    format4: Format4Demodulator,
    estimator: Box<dyn PucchDmrsEstimator>,
    estimate: ChannelEstimate,
    sinr_type: SinrType,
}

impl PucchProcessor {
    pub fn new(config: PucchProcessorConfig, estimator: Box<dyn PucchDmrsEstimator>) -> Result<Self, LayerError> {
        let equalizer = ChannelEqualizer::new(config.equalizer);
        let processor = Self {
            validator: PucchPduValidator::default(),
            format0: Format0Detector::new(Box::new(ShortLowPaprCollection::new())),
            format1: Format1Detector::new(Box::new(ShortLowPaprCollection::new()))?,
            format2: Format2Demodulator::new(equalizer, Box::new(GoldSequenceGenerator::new(0))),
            format3: Format3Demodulator::new(equalizer, Box::new(GoldSequenceGenerator::new(0)))?,
            format4: Format4Demodulator::new(equalizer, Box::new(GoldSequenceGenerator::new(0)))?,
            estimator,
            estimate: ChannelEstimate::new(ChannelEstimateDimensions::default()),
            sinr_type: config.sinr_type,
        };
        debug!("Created PUCCH processor: {:?}", config);
        Ok(processor)
    }

    /// Run the estimator and seed the CSI with its measurements
    fn estimate_channel(&mut self, grid: &dyn ResourceGridReader, request: PucchEstimateRequest<'_>) -> ChannelStateInformation {
        self.estimate.resize(request.dimensions());
        self.estimator.estimate(&mut self.estimate, grid, request);

        let mut csi = ChannelStateInformation::new(self.sinr_type);
        let rsrp = self.estimate.mean_rsrp();
        let noise_var = self.estimate.mean_noise_variance();
        csi.set_rsrp(rsrp);
        csi.set_epre(self.estimate.mean_epre());
        if noise_var.is_finite() && noise_var > 0.0 {
            csi.set_sinr_ch_estimator(rsrp / noise_var);
        }
        if let Some(time_alignment) = self.estimate.time_alignment() {
            csi.set_time_alignment(time_alignment);
        }
        csi
    }
}

impl PucchProcessing for PucchProcessor {
    fn process_format0(&mut self, grid: &dyn ResourceGridReader, config: &Format0Configuration) -> PucchDetectionResult {
        if let Err(e) = self.validator.validate_format0(config) {
            panic!("Invalid PUCCH Format 0 configuration: {}", e);
        }
        self.format0.detect(grid, config)
    }

    fn process_format1(&mut self, grid: &dyn ResourceGridReader, config: &Format1Configuration) -> Format1BatchResult {
        if let Err(e) = self.validator.validate_format1(config) {
            panic!("Invalid PUCCH Format 1 configuration: {}", e);
        }
        self.format1.detect(grid, config)
    }

    fn process_format2(&mut self, grid: &dyn ResourceGridReader, config: &Format2Configuration) -> PucchDemodulationResult {
        if let Err(e) = self.validator.validate_format2(config) {
            panic!("Invalid PUCCH Format 2 configuration: {}", e);
        }
        let mut csi = self.estimate_channel(grid, PucchEstimateRequest::Format2(config));
        let mut llrs = vec![0.0; config.nof_coded_bits()];
        self.format2.demodulate(&mut llrs, &mut csi, grid, &self.estimate, config);
        PucchDemodulationResult { llrs, csi }
    }

    fn process_format3(&mut self, grid: &dyn ResourceGridReader, config: &Format3Configuration) -> PucchDemodulationResult {
        if let Err(e) = self.validator.validate_format3(config) {
            panic!("Invalid PUCCH Format 3 configuration: {}", e);
        }
        let mut csi = self.estimate_channel(grid, PucchEstimateRequest::Format3(config));
        let mut llrs = vec![0.0; config.nof_coded_bits()];
        self.format3.demodulate(&mut llrs, &mut csi, grid, &self.estimate, config);
        PucchDemodulationResult { llrs, csi }
    }

    fn process_format4(&mut self, grid: &dyn ResourceGridReader, config: &Format4Configuration) -> PucchDemodulationResult {
        if let Err(e) = self.validator.validate_format4(config) {
            panic!("Invalid PUCCH Format 4 configuration: {}", e);
        }
        let mut csi = self.estimate_channel(grid, PucchEstimateRequest::Format4(config));
        let mut llrs = vec![0.0; config.nof_coded_bits()];
        self.format4.demodulate(&mut llrs, &mut csi, grid, &self.estimate, config);
        PucchDemodulationResult { llrs, csi }
    }
}

impl std::fmt::Debug for PucchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PucchProcessor")
            .field("sinr_type", &self.sinr_type)
            .field("format2", &self.format2)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::demodulation::hard_decision;
    use crate::phy::pucch::config::{Format1MultiplexKey, Format1UeParameters, GroupHopping, UciPayloadSize};
    use crate::phy::pucch::modulator::PucchModulator;
    use crate::phy::pucch::uci::UciStatus;
    use crate::phy::resource_grid::ResourceGrid;
    use common::types::{CyclicPrefix, Rnti, SlotPoint};
    use num_complex::Complex32;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Estimator reporting a known flat channel
    struct FlatEstimator {
        gains: Vec<Complex32>,
        noise_var: f32,
    }

    impl PucchDmrsEstimator for FlatEstimator {
        fn estimate(&mut self, estimate: &mut ChannelEstimate, _grid: &dyn ResourceGridReader, request: PucchEstimateRequest<'_>) {
            let dims = request.dimensions();
            for (port, gain) in self.gains.iter().enumerate().take(dims.nof_rx_ports) {
                for symbol in 0..dims.nof_symbols {
                    estimate.symbol_coefficients_mut(symbol, port, 0).fill(*gain);
                }
                estimate.set_noise_variance(self.noise_var, port);
                estimate.set_rsrp(gain.norm_sqr(), port);
                estimate.set_epre(gain.norm_sqr() + self.noise_var, port);
            }
            estimate.set_time_alignment(1e-7);
        }
    }

    fn processor(gains: &[Complex32], sinr_type: SinrType) -> PucchProcessor {
        PucchProcessor::new(
            PucchProcessorConfig {
                equalizer: EqualizerAlgorithm::Mmse,
                sinr_type,
            },
            Box::new(FlatEstimator {
                gains: gains.to_vec(),
                noise_var: 0.01,
            }),
        )
        .unwrap()
    }

    fn allocation(start_symbol_index: usize, nof_symbols: usize) -> PucchAllocation {
        PucchAllocation {
            slot: SlotPoint::default(),
            cp: CyclicPrefix::Normal,
            bwp_start_rb: 0,
            bwp_size_rb: 25,
            starting_prb: 4,
            second_hop_prb: None,
            start_symbol_index,
            nof_symbols,
        }
    }

    #[test]
    fn test_format1_through_processor() {
        let gains = [Complex32::new(0.7, 0.7)];
        let config = Format1Configuration {
            allocation: allocation(0, 14),
            n_id: 10,
            group_hopping: GroupHopping::Enable,
            ue_parameters: [(Format1MultiplexKey::new(4, 1), Format1UeParameters { nof_harq_ack: 1 })]
                .into_iter()
                .collect(),
            ports: vec![0],
        };
        let mut grid = ResourceGrid::new(1, 14, 25);
        PucchModulator::new()
            .unwrap()
            .modulate_format1(&mut grid, &config, Format1MultiplexKey::new(4, 1), &[1], &gains);

        let results = processor(&gains, SinrType::ChannelEstimator).process_format1(&grid, &config);
        let result = &results[&Format1MultiplexKey::new(4, 1)];
        assert_eq!(result.uci_message.status(), UciStatus::Valid);
        assert_eq!(result.uci_message.harq_ack_bits(), &[1]);
    }

    #[test]
    fn test_format2_csi_from_estimate() {
        let mut rng = StdRng::seed_from_u64(5);
        let gains = [Complex32::new(1.0, 0.0), Complex32::new(0.0, -1.0)];
        let config = Format2Configuration {
            allocation: allocation(10, 2),
            nof_prb: 4,
            rnti: Rnti(0x3333),
            n_id: 1000,
            n_id_0: 1000,
            uci: UciPayloadSize {
                nof_harq_ack: 3,
                nof_sr: 1,
                nof_csi_part1: 20,
                ..Default::default()
            },
            ports: vec![0, 1],
        };
        let bits: Vec<u8> = (0..config.nof_coded_bits()).map(|_| rng.gen_range(0..2)).collect();
        let mut grid = ResourceGrid::new(2, 14, 25);
        PucchModulator::new().unwrap().modulate_format2(&mut grid, &config, &bits, &gains);

        let result = processor(&gains, SinrType::ChannelEstimator).process_format2(&grid, &config);
        let mut decided = vec![0u8; bits.len()];
        hard_decision(&mut decided, &result.llrs);
        assert_eq!(decided, bits);

        assert!((result.csi.rsrp().unwrap() - 1.0).abs() < 1e-6);
        assert!((result.csi.sinr_db().unwrap() - 20.0).abs() < 1e-3);
        assert_eq!(result.csi.time_alignment(), Some(1e-7));
        assert!(result.csi.sinr_post_eq_db().is_some());
    }

    #[test]
    fn test_format4_through_processor() {
        let mut rng = StdRng::seed_from_u64(8);
        let gains = [Complex32::new(0.2, 0.9)];
        let config = Format4Configuration {
            allocation: allocation(0, 10),
            rnti: Rnti(0x0101),
            n_id: 3,
            n_id_hopping: 3,
            group_hopping: GroupHopping::Neither,
            pi2_bpsk: false,
            additional_dmrs: true,
            occ_length: 2,
            occ_index: 0,
            uci: UciPayloadSize {
                nof_harq_ack: 2,
                nof_csi_part1: 10,
                ..Default::default()
            },
            ports: vec![0],
        };
        let bits: Vec<u8> = (0..config.nof_coded_bits()).map(|_| rng.gen_range(0..2)).collect();
        let mut grid = ResourceGrid::new(1, 14, 25);
        PucchModulator::new().unwrap().modulate_format4(&mut grid, &config, &bits, &gains);

        let mut processor = processor(&gains, SinrType::PostEqualization);
        let result = processor.process_format4(&grid, &config);
        assert_eq!(result.llrs.len(), config.nof_coded_bits());
        let mut decided = vec![0u8; bits.len()];
        hard_decision(&mut decided, &result.llrs);
        assert_eq!(decided, bits);

        // A shorter request on the same processor gets its own coded length
        let shorter = Format4Configuration {
            occ_length: 4,
            occ_index: 1,
            ..config.clone()
        };
        let bits: Vec<u8> = (0..shorter.nof_coded_bits()).map(|_| rng.gen_range(0..2)).collect();
        let mut grid = ResourceGrid::new(1, 14, 25);
        PucchModulator::new().unwrap().modulate_format4(&mut grid, &shorter, &bits, &gains);

        let second = processor.process_format4(&grid, &shorter);
        assert_eq!(second.llrs.len(), shorter.nof_coded_bits());
        assert_eq!(result.llrs.len(), config.nof_coded_bits());
        let mut decided = vec![0u8; bits.len()];
        hard_decision(&mut decided, &second.llrs);
        assert_eq!(decided, bits);
    }

    #[test]
    #[should_panic(expected = "Invalid PUCCH Format 3 configuration")]
    fn test_invalid_configuration_is_fatal() {
        let config = Format3Configuration {
            allocation: allocation(0, 3),
            nof_prb: 1,
            rnti: Rnti(1),
            n_id: 0,
            n_id_hopping: 0,
            group_hopping: GroupHopping::Neither,
            pi2_bpsk: false,
            additional_dmrs: false,
            uci: UciPayloadSize {
                nof_harq_ack: 1,
                ..Default::default()
            },
            ports: vec![0],
        };
        let grid = ResourceGrid::new(1, 14, 25);
        processor(&[Complex32::new(1.0, 0.0)], SinrType::Evm).process_format3(&grid, &config);
    }
}
