//! Simulated PUCCH scenarios
//!
//! A scenario turns its TOML description into the format configuration,
//! transmits random UCI through the modulator and the channel, and scores
//! what the processor pool returns.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use common::types::{CyclicPrefix, Rnti, SlotPoint, SubcarrierSpacing, MAX_NSYMB_PER_SLOT};
use common::utils::{count_bit_errors, unpack_bits};
use layers::phy::pucch::{
    ChannelStateInformation, Format0Configuration, Format1Configuration, Format1MultiplexKey, Format1UeParameters,
    Format2Configuration, Format3Configuration, Format4Configuration, GroupHopping, PucchAllocation, PucchFormat,
    PucchModulator, PucchPduValidator, PucchProcessorPool, UciPayloadSize, UciStatus,
};
use layers::phy::{hard_decision, ResourceGrid};
use rand::rngs::StdRng;
use rand::Rng;

use crate::channel::FlatChannel;
use crate::config::{ReceiverConfig, ScenarioConfig};

/// Format configuration of a scenario
#[derive(Debug, Clone)]
pub enum PucchScenario {
    Format0(Format0Configuration),
    Format1 {
        config: Format1Configuration,
        key: Format1MultiplexKey,
    },
    Format2(Format2Configuration),
    Format3(Format3Configuration),
    Format4(Format4Configuration),
}

/// Outcome of one transmission
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrialOutcome {
    /// The received message or codeword differs from the transmitted one
    pub error: bool,
    pub bit_errors: usize,
    pub nof_bits: usize,
    /// The pool could not serve the request
    pub rejected: bool,
    pub sinr_db: Option<f32>,
}

/// Aggregated outcomes of a scenario
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScenarioStats {
    pub trials: usize,
    pub errors: usize,
    pub bit_errors: usize,
    pub nof_bits: usize,
    pub rejected: usize,
    sinr_db_sum: f32,
    sinr_count: usize,
}

impl ScenarioStats {
    pub fn record(&mut self, outcome: &TrialOutcome) {
        self.trials += 1;
        self.errors += usize::from(outcome.error);
        self.bit_errors += outcome.bit_errors;
        self.nof_bits += outcome.nof_bits;
        self.rejected += usize::from(outcome.rejected);
        if let Some(sinr_db) = outcome.sinr_db {
            self.sinr_db_sum += sinr_db;
            self.sinr_count += 1;
        }
    }

    pub fn merge(&mut self, other: &ScenarioStats) {
        self.trials += other.trials;
        self.errors += other.errors;
        self.bit_errors += other.bit_errors;
        self.nof_bits += other.nof_bits;
        self.rejected += other.rejected;
        self.sinr_db_sum += other.sinr_db_sum;
        self.sinr_count += other.sinr_count;
    }

    /// Fraction of transmissions received in error
    pub fn error_rate(&self) -> f32 {
        if self.trials == 0 {
            return 0.0;
        }
        self.errors as f32 / self.trials as f32
    }

    pub fn bit_error_rate(&self) -> f32 {
        if self.nof_bits == 0 {
            return 0.0;
        }
        self.bit_errors as f32 / self.nof_bits as f32
    }

    pub fn mean_sinr_db(&self) -> Option<f32> {
        (self.sinr_count > 0).then(|| self.sinr_db_sum / self.sinr_count as f32)
    }
}

impl PucchScenario {
    /// Build and validate the format configuration
    pub fn new(scenario: &ScenarioConfig, receiver: &ReceiverConfig) -> Result<Self> {
        let Some(slot) = SlotPoint::new(SubcarrierSpacing::Scs30, 0, 0) else {
            bail!("Invalid slot");
        };
        let allocation = PucchAllocation {
            slot,
            cp: CyclicPrefix::Normal,
            bwp_start_rb: 0,
            bwp_size_rb: receiver.bandwidth_prb,
            starting_prb: scenario.starting_prb,
            second_hop_prb: scenario.second_hop_prb,
            start_symbol_index: scenario.start_symbol,
            nof_symbols: scenario.nof_symbols,
        };
        let ports: Vec<usize> = (0..receiver.nof_ports).collect();
        let uci = UciPayloadSize {
            nof_harq_ack: scenario.nof_harq_ack,
            nof_sr: 0,
            nof_csi_part1: scenario.nof_csi_part1,
            nof_csi_part2: 0,
        };
        let rnti = Rnti(scenario.rnti);
        let validator = PucchPduValidator::new(receiver.nof_ports);

        let built = match scenario.format {
            PucchFormat::Format0 => {
                let config = Format0Configuration {
                    allocation,
                    n_id: scenario.n_id,
                    group_hopping: GroupHopping::Neither,
                    initial_cyclic_shift: scenario.initial_cyclic_shift,
                    nof_harq_ack: scenario.nof_harq_ack,
                    sr_opportunity: scenario.sr_opportunity,
                    ports,
                };
                validator.validate_format0(&config)?;
                Self::Format0(config)
            }
            PucchFormat::Format1 => {
                let key = Format1MultiplexKey::new(scenario.initial_cyclic_shift, scenario.time_domain_occ);
                let config = Format1Configuration {
                    allocation,
                    n_id: scenario.n_id,
                    group_hopping: GroupHopping::Neither,
                    ue_parameters: BTreeMap::from([(
                        key,
                        Format1UeParameters {
                            nof_harq_ack: scenario.nof_harq_ack,
                        },
                    )]),
                    ports,
                };
                validator.validate_format1(&config)?;
                Self::Format1 { config, key }
            }
            PucchFormat::Format2 => {
                let config = Format2Configuration {
                    allocation,
                    nof_prb: scenario.nof_prb,
                    rnti,
                    n_id: scenario.n_id,
                    n_id_0: scenario.n_id,
                    uci,
                    ports,
                };
                validator.validate_format2(&config)?;
                Self::Format2(config)
            }
            PucchFormat::Format3 => {
                let config = Format3Configuration {
                    allocation,
                    nof_prb: scenario.nof_prb,
                    rnti,
                    n_id: scenario.n_id,
                    n_id_hopping: scenario.n_id,
                    group_hopping: GroupHopping::Neither,
                    pi2_bpsk: scenario.pi2_bpsk,
                    additional_dmrs: scenario.additional_dmrs,
                    uci,
                    ports,
                };
                validator.validate_format3(&config)?;
                Self::Format3(config)
            }
            PucchFormat::Format4 => {
                let config = Format4Configuration {
                    allocation,
                    rnti,
                    n_id: scenario.n_id,
                    n_id_hopping: scenario.n_id,
                    group_hopping: GroupHopping::Neither,
                    pi2_bpsk: scenario.pi2_bpsk,
                    additional_dmrs: scenario.additional_dmrs,
                    occ_length: scenario.occ_length,
                    occ_index: scenario.occ_index,
                    uci,
                    ports,
                };
                validator.validate_format4(&config)?;
                Self::Format4(config)
            }
        };
        Ok(built)
    }

    /// Resource grid large enough for the scenario
    pub fn grid(receiver: &ReceiverConfig) -> ResourceGrid {
        ResourceGrid::new(receiver.nof_ports, MAX_NSYMB_PER_SLOT, receiver.bandwidth_prb)
    }

    /// Transmit random UCI once and score the reception
    pub fn run_trial(
        &self,
        modulator: &mut PucchModulator,
        grid: &mut ResourceGrid,
        channel: &FlatChannel,
        pool: &PucchProcessorPool,
        rng: &mut StdRng,
    ) -> TrialOutcome {
        grid.set_all_zero();
        match self {
            Self::Format0(config) => {
                let harq_ack = unpack_bits(rng.gen::<u32>(), config.nof_harq_ack);
                let sr = config.sr_opportunity && rng.gen_bool(0.5);
                modulator.modulate_format0(grid, config, &harq_ack, sr, channel.gains());
                channel.add_noise(grid, rng);

                let result = pool.process_format0(grid, config);
                let message = &result.uci_message;
                let transmitted = config.nof_harq_ack > 0 || sr;
                let error = if transmitted {
                    !message.is_valid()
                        || message.harq_ack_bits() != harq_ack.as_slice()
                        || message.sr_bits().first().is_some_and(|&bit| (bit == 1) != sr)
                } else {
                    message.is_valid()
                };
                TrialOutcome {
                    error,
                    bit_errors: usize::from(error),
                    nof_bits: 1,
                    rejected: message.status() == UciStatus::Unknown,
                    sinr_db: sinr_db(&result.csi),
                }
            }
            Self::Format1 { config, key } => {
                let nof_harq_ack = config.ue_parameters.get(key).map_or(0, |p| p.nof_harq_ack);
                let bits = unpack_bits(rng.gen::<u32>(), nof_harq_ack);
                modulator.modulate_format1(grid, config, *key, &bits, channel.gains());
                channel.add_noise(grid, rng);

                let results = pool.process_format1(grid, config);
                let Some(result) = results.get(key) else {
                    return TrialOutcome {
                        error: true,
                        bit_errors: 1,
                        nof_bits: 1,
                        rejected: true,
                        sinr_db: None,
                    };
                };
                let message = &result.uci_message;
                let error = !message.is_valid() || message.harq_ack_bits() != bits.as_slice();
                TrialOutcome {
                    error,
                    bit_errors: usize::from(error),
                    nof_bits: 1,
                    rejected: message.status() == UciStatus::Unknown,
                    sinr_db: sinr_db(&result.csi),
                }
            }
            Self::Format2(config) => {
                let bits = random_bits(rng, config.nof_coded_bits());
                modulator.modulate_format2(grid, config, &bits, channel.gains());
                channel.add_noise(grid, rng);
                let result = pool.process_format2(grid, config);
                score_codeword(&bits, &result.llrs, &result.csi)
            }
            Self::Format3(config) => {
                let bits = random_bits(rng, config.nof_coded_bits());
                modulator.modulate_format3(grid, config, &bits, channel.gains());
                channel.add_noise(grid, rng);
                let result = pool.process_format3(grid, config);
                score_codeword(&bits, &result.llrs, &result.csi)
            }
            Self::Format4(config) => {
                let bits = random_bits(rng, config.nof_coded_bits());
                modulator.modulate_format4(grid, config, &bits, channel.gains());
                channel.add_noise(grid, rng);
                let result = pool.process_format4(grid, config);
                score_codeword(&bits, &result.llrs, &result.csi)
            }
        }
    }
}

fn random_bits(rng: &mut StdRng, nof_bits: usize) -> Vec<u8> {
    (0..nof_bits).map(|_| rng.gen_range(0..=1u8)).collect()
}

fn sinr_db(csi: &ChannelStateInformation) -> Option<f32> {
    csi.sinr_db()
}

/// Compare hard decisions of the LLRs with the transmitted coded bits
fn score_codeword(bits: &[u8], llrs: &[f32], csi: &ChannelStateInformation) -> TrialOutcome {
    let mut decisions = vec![0u8; llrs.len()];
    hard_decision(&mut decisions, llrs);
    let bit_errors = count_bit_errors(bits, &decisions);
    TrialOutcome {
        error: bit_errors > 0,
        bit_errors,
        nof_bits: bits.len(),
        // An erased result carries no measurements
        rejected: csi.rsrp().is_none(),
        sinr_db: sinr_db(csi),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::phy::pucch::{PucchProcessor, PucchProcessorConfig};
    use rand::SeedableRng;

    fn scenario(format: PucchFormat, nof_symbols: usize) -> ScenarioConfig {
        ScenarioConfig {
            name: "test".to_string(),
            format,
            starting_prb: 2,
            second_hop_prb: None,
            start_symbol: 0,
            nof_symbols,
            nof_prb: 2,
            rnti: 0x4601,
            n_id: 7,
            initial_cyclic_shift: 0,
            time_domain_occ: 0,
            nof_harq_ack: 2,
            sr_opportunity: false,
            nof_csi_part1: 10,
            pi2_bpsk: false,
            additional_dmrs: false,
            occ_length: 2,
            occ_index: 0,
        }
    }

    fn pool(channel: &FlatChannel) -> PucchProcessorPool {
        let processors = (0..2)
            .map(|_| PucchProcessor::new(PucchProcessorConfig::default(), Box::new(channel.estimator())).unwrap())
            .collect();
        PucchProcessorPool::new(processors).unwrap()
    }

    #[test]
    fn test_invalid_scenario_is_rejected() {
        let receiver = ReceiverConfig::default();
        // Format 3 does not support seven resource blocks
        let mut config = scenario(PucchFormat::Format3, 14);
        config.nof_prb = 7;
        assert!(PucchScenario::new(&config, &receiver).is_err());
    }

    #[test]
    fn test_high_snr_trials_are_error_free() {
        let receiver = ReceiverConfig::default();
        let channel = FlatChannel::new(receiver.nof_ports, 30.0, 1);
        let pool = pool(&channel);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = PucchScenario::grid(&receiver);
        let mut rng = StdRng::seed_from_u64(42);

        for (format, nof_symbols) in [
            (PucchFormat::Format0, 2),
            (PucchFormat::Format1, 14),
            (PucchFormat::Format2, 2),
            (PucchFormat::Format3, 14),
            (PucchFormat::Format4, 14),
        ] {
            let simulated = PucchScenario::new(&scenario(format, nof_symbols), &receiver).unwrap();
            let mut stats = ScenarioStats::default();
            for _ in 0..10 {
                let outcome = simulated.run_trial(&mut modulator, &mut grid, &channel, &pool, &mut rng);
                stats.record(&outcome);
            }
            assert_eq!(stats.trials, 10);
            assert_eq!(stats.rejected, 0, "{:?}", format);
            assert_eq!(stats.errors, 0, "{:?}", format);
            assert!(stats.mean_sinr_db().is_some(), "{:?}", format);
        }
    }

    #[test]
    fn test_stats_merge() {
        let mut first = ScenarioStats::default();
        first.record(&TrialOutcome {
            error: true,
            bit_errors: 3,
            nof_bits: 10,
            rejected: false,
            sinr_db: Some(10.0),
        });
        let mut second = ScenarioStats::default();
        second.record(&TrialOutcome {
            error: false,
            bit_errors: 0,
            nof_bits: 10,
            rejected: false,
            sinr_db: Some(20.0),
        });
        first.merge(&second);
        assert_eq!(first.trials, 2);
        assert!((first.error_rate() - 0.5).abs() < 1e-6);
        assert!((first.bit_error_rate() - 0.15).abs() < 1e-6);
        assert_eq!(first.mean_sinr_db(), Some(15.0));
    }
}
