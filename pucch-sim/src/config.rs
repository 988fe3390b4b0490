//! TOML configuration of the PUCCH link simulator

use anyhow::{ensure, Context, Result};
use layers::phy::pucch::{PucchFormat, PucchProcessorConfig, SinrType};
use layers::phy::EqualizerAlgorithm;
use serde::{Deserialize, Serialize};

/// Simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// Processor pool and callers
    #[serde(default)]
    pub pool: PoolConfig,
    /// Receiver settings
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// Channel model
    #[serde(default)]
    pub channel: ChannelConfig,
    /// PUCCH transmissions to simulate
    pub scenarios: Vec<ScenarioConfig>,
}

/// Processor pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of processor instances
    #[serde(default = "default_nof_processors")]
    pub nof_processors: usize,
    /// Number of concurrent caller threads
    #[serde(default = "default_nof_callers")]
    pub nof_callers: usize,
    /// Transmissions per scenario
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_nof_processors() -> usize {
    4
}

fn default_nof_callers() -> usize {
    4
}

fn default_iterations() -> usize {
    200
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nof_processors: default_nof_processors(),
            nof_callers: default_nof_callers(),
            iterations: default_iterations(),
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiverConfig {
    /// Equalizer for Formats 2, 3 and 4
    #[serde(default)]
    pub equalizer: EqualizerAlgorithm,
    /// SINR reported for Formats 2, 3 and 4
    #[serde(default)]
    pub sinr_type: SinrType,
    /// Number of receive ports
    #[serde(default = "default_nof_ports")]
    pub nof_ports: usize,
    /// Bandwidth part size in PRB, starting at PRB 0 of the grid
    #[serde(default = "default_bandwidth_prb")]
    pub bandwidth_prb: usize,
}

fn default_nof_ports() -> usize {
    2
}

fn default_bandwidth_prb() -> usize {
    52
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            equalizer: EqualizerAlgorithm::default(),
            sinr_type: SinrType::default(),
            nof_ports: default_nof_ports(),
            bandwidth_prb: default_bandwidth_prb(),
        }
    }
}

impl ReceiverConfig {
    pub fn processor_config(&self) -> PucchProcessorConfig {
        PucchProcessorConfig {
            equalizer: self.equalizer,
            sinr_type: self.sinr_type,
        }
    }
}

/// Flat channel with additive white Gaussian noise
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Signal to noise ratio per receive port in dB
    #[serde(default = "default_snr_db")]
    pub snr_db: f32,
    /// Seed of the per port channel gains and the noise
    #[serde(default)]
    pub seed: u64,
}

fn default_snr_db() -> f32 {
    10.0
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            snr_db: default_snr_db(),
            seed: 0,
        }
    }
}

/// One simulated PUCCH transmission
///
/// Fields that do not apply to the format are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub format: PucchFormat,
    #[serde(default)]
    pub starting_prb: usize,
    #[serde(default)]
    pub second_hop_prb: Option<usize>,
    #[serde(default)]
    pub start_symbol: usize,
    pub nof_symbols: usize,
    /// Formats 2 and 3
    #[serde(default = "default_nof_prb")]
    pub nof_prb: usize,
    #[serde(default = "default_rnti")]
    pub rnti: u16,
    #[serde(default)]
    pub n_id: u32,
    /// Formats 0 and 1
    #[serde(default)]
    pub initial_cyclic_shift: u32,
    /// Format 1
    #[serde(default)]
    pub time_domain_occ: u32,
    #[serde(default)]
    pub nof_harq_ack: usize,
    /// Format 0
    #[serde(default)]
    pub sr_opportunity: bool,
    /// Formats 2, 3 and 4
    #[serde(default)]
    pub nof_csi_part1: usize,
    /// Formats 3 and 4
    #[serde(default)]
    pub pi2_bpsk: bool,
    #[serde(default)]
    pub additional_dmrs: bool,
    /// Format 4
    #[serde(default = "default_occ_length")]
    pub occ_length: usize,
    #[serde(default)]
    pub occ_index: usize,
}

fn default_nof_prb() -> usize {
    1
}

fn default_rnti() -> u16 {
    0x4601
}

fn default_occ_length() -> usize {
    2
}

impl SimConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path))?;
        Self::from_toml_str(&contents).with_context(|| format!("Parsing {}", path))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        ensure!(self.pool.nof_processors > 0, "At least one processor is required");
        ensure!(self.pool.nof_callers > 0, "At least one caller is required");
        ensure!(
            (1..=common::MAX_PORTS).contains(&self.receiver.nof_ports),
            "Invalid number of receive ports {}",
            self.receiver.nof_ports
        );
        ensure!(
            (1..=common::MAX_RB).contains(&self.receiver.bandwidth_prb),
            "Invalid bandwidth of {} PRB",
            self.receiver.bandwidth_prb
        );
        ensure!(!self.scenarios.is_empty(), "No scenarios configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_scenarios() {
        let config = SimConfig::from_toml_str(
            r#"
            [channel]
            snr_db = 5.0

            [[scenarios]]
            name = "sr"
            format = "Format0"
            nof_symbols = 1
            sr_opportunity = true

            [[scenarios]]
            name = "csi"
            format = "Format3"
            nof_symbols = 14
            nof_prb = 2
            nof_csi_part1 = 30
            pi2_bpsk = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.nof_processors, 4);
        assert_eq!(config.receiver.nof_ports, 2);
        assert_eq!(config.receiver.equalizer, EqualizerAlgorithm::Mmse);
        assert_eq!(config.channel.snr_db, 5.0);
        assert_eq!(config.scenarios.len(), 2);
        assert_eq!(config.scenarios[0].format, PucchFormat::Format0);
        assert_eq!(config.scenarios[1].nof_prb, 2);
        assert_eq!(config.scenarios[1].occ_length, 2);
    }

    #[test]
    fn test_rejects_empty_pool() {
        let result = SimConfig::from_toml_str(
            r#"
            [pool]
            nof_processors = 0

            [[scenarios]]
            name = "sr"
            format = "Format0"
            nof_symbols = 1
            "#,
        );
        assert!(result.is_err());
    }
}
