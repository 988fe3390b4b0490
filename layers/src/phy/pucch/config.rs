//! PUCCH configurations
//!
//! One value type per PUCCH format. Resource block indices are relative to
//! the bandwidth part; symbol indices are relative to the start of the slot.

use common::types::{CyclicPrefix, Rnti, SlotPoint, NRE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::phy::demodulation::Modulation;

/// Sequence group and sequence hopping (TS 38.211 Section 6.3.2.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupHopping {
    /// Neither group nor sequence hopping
    #[default]
    Neither,
    /// Group hopping enabled, sequence hopping disabled
    Enable,
    /// Sequence hopping enabled, group hopping disabled
    Disable,
}

/// PUCCH format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PucchFormat {
    Format0,
    Format1,
    Format2,
    Format3,
    Format4,
}

/// Time and frequency allocation shared by all PUCCH formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PucchAllocation {
    /// Slot the PUCCH is received in
    pub slot: SlotPoint,
    /// Cyclic prefix of the bandwidth part
    pub cp: CyclicPrefix,
    /// First resource block of the bandwidth part within the carrier
    pub bwp_start_rb: usize,
    /// Number of resource blocks of the bandwidth part
    pub bwp_size_rb: usize,
    /// First resource block of the first hop, relative to the bandwidth part
    pub starting_prb: usize,
    /// First resource block of the second hop, if intra-slot hopping is enabled
    pub second_hop_prb: Option<usize>,
    /// First OFDM symbol within the slot
    pub start_symbol_index: usize,
    /// Number of OFDM symbols
    pub nof_symbols: usize,
}

impl PucchAllocation {
    /// Whether intra-slot frequency hopping is enabled
    pub fn is_hopping(&self) -> bool {
        self.second_hop_prb.is_some()
    }

    /// Number of symbols in the first hop
    pub fn first_hop_len(&self) -> usize {
        if self.is_hopping() {
            self.nof_symbols / 2
        } else {
            self.nof_symbols
        }
    }

    /// Number of hops (1 or 2)
    pub fn nof_hops(&self) -> usize {
        if self.is_hopping() {
            2
        } else {
            1
        }
    }

    /// Relative symbol range of a hop
    pub fn hop_symbols(&self, hop: usize) -> std::ops::Range<usize> {
        match hop {
            0 => 0..self.first_hop_len(),
            _ => self.first_hop_len()..self.nof_symbols,
        }
    }

    /// Hop a relative symbol index belongs to
    pub fn hop_of_symbol(&self, symbol: usize) -> usize {
        usize::from(symbol >= self.first_hop_len())
    }

    /// Resource block of a hop, relative to the bandwidth part
    pub fn hop_prb(&self, hop: usize) -> usize {
        match (hop, self.second_hop_prb) {
            (0, _) | (_, None) => self.starting_prb,
            (_, Some(prb)) => prb,
        }
    }

    /// First carrier subcarrier of a hop
    pub fn hop_first_subcarrier(&self, hop: usize) -> usize {
        (self.bwp_start_rb + self.hop_prb(hop)) * NRE
    }

    /// Slot symbol index of a relative symbol
    pub fn slot_symbol(&self, symbol: usize) -> usize {
        self.start_symbol_index + symbol
    }
}

/// PUCCH Format 0 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format0Configuration {
    pub allocation: PucchAllocation,
    /// Hopping identifier (n_ID)
    pub n_id: u32,
    pub group_hopping: GroupHopping,
    /// Initial cyclic shift (m_0)
    pub initial_cyclic_shift: u32,
    /// Number of HARQ-ACK bits (0 to 2)
    pub nof_harq_ack: usize,
    /// Whether the slot is a scheduling request opportunity
    pub sr_opportunity: bool,
    /// Receive ports to process
    pub ports: Vec<usize>,
}

/// Identifies one of the transmissions multiplexed on a Format 1 resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Format1MultiplexKey {
    /// Initial cyclic shift (m_0)
    pub initial_cyclic_shift: u32,
    /// Time-domain orthogonal cover code index
    pub time_domain_occ: u32,
}

impl Format1MultiplexKey {
    pub fn new(initial_cyclic_shift: u32, time_domain_occ: u32) -> Self {
        Self {
            initial_cyclic_shift,
            time_domain_occ,
        }
    }
}

/// Parameters of one multiplexed Format 1 transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Format1UeParameters {
    /// Number of HARQ-ACK bits (0 to 2). Zero means a scheduling request only
    pub nof_harq_ack: usize,
}

/// PUCCH Format 1 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format1Configuration {
    pub allocation: PucchAllocation,
    /// Hopping identifier (n_ID)
    pub n_id: u32,
    pub group_hopping: GroupHopping,
    /// Transmissions sharing the resource
    pub ue_parameters: BTreeMap<Format1MultiplexKey, Format1UeParameters>,
    /// Receive ports to process
    pub ports: Vec<usize>,
}

/// UCI payload sizes carried by Formats 2, 3 and 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UciPayloadSize {
    pub nof_harq_ack: usize,
    pub nof_sr: usize,
    pub nof_csi_part1: usize,
    pub nof_csi_part2: usize,
}

impl UciPayloadSize {
    pub fn total(&self) -> usize {
        self.nof_harq_ack + self.nof_sr + self.nof_csi_part1 + self.nof_csi_part2
    }
}

/// Number of data subcarriers per resource block for Format 2
pub const FORMAT2_NOF_DATA_SC_PER_PRB: usize = 8;

/// PUCCH Format 2 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format2Configuration {
    pub allocation: PucchAllocation,
    /// Number of resource blocks (1 to 16)
    pub nof_prb: usize,
    pub rnti: Rnti,
    /// Data scrambling identifier
    pub n_id: u32,
    /// DM-RS scrambling identifier (N_ID^0)
    pub n_id_0: u32,
    pub uci: UciPayloadSize,
    /// Receive ports to process
    pub ports: Vec<usize>,
}

impl Format2Configuration {
    /// Number of data resource elements
    pub fn nof_data_re(&self) -> usize {
        self.nof_prb * FORMAT2_NOF_DATA_SC_PER_PRB * self.allocation.nof_symbols
    }

    /// Number of coded bits (E) carried by the allocation
    pub fn nof_coded_bits(&self) -> usize {
        self.nof_data_re() * Modulation::Qpsk.bits_per_symbol()
    }
}

/// PUCCH Format 3 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format3Configuration {
    pub allocation: PucchAllocation,
    /// Number of resource blocks
    pub nof_prb: usize,
    pub rnti: Rnti,
    /// Data scrambling identifier
    pub n_id: u32,
    /// Hopping identifier for the DM-RS sequence
    pub n_id_hopping: u32,
    pub group_hopping: GroupHopping,
    /// π/2-BPSK modulation instead of QPSK
    pub pi2_bpsk: bool,
    /// Additional DM-RS symbols for long allocations
    pub additional_dmrs: bool,
    pub uci: UciPayloadSize,
    /// Receive ports to process
    pub ports: Vec<usize>,
}

impl Format3Configuration {
    pub fn modulation(&self) -> Modulation {
        modulation(self.pi2_bpsk)
    }

    /// Number of coded bits (E) carried by the allocation
    pub fn nof_coded_bits(&self) -> usize {
        let nof_data_symbols = self.allocation.nof_symbols
            - super::format3::dmrs_symbol_mask(
                self.allocation.nof_symbols,
                self.allocation.is_hopping(),
                self.additional_dmrs,
            )
            .nof_symbols();
        nof_data_symbols * self.nof_prb * NRE * self.modulation().bits_per_symbol()
    }
}

/// PUCCH Format 4 configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format4Configuration {
    pub allocation: PucchAllocation,
    pub rnti: Rnti,
    /// Data scrambling identifier
    pub n_id: u32,
    /// Hopping identifier for the DM-RS sequence
    pub n_id_hopping: u32,
    pub group_hopping: GroupHopping,
    /// π/2-BPSK modulation instead of QPSK
    pub pi2_bpsk: bool,
    /// Additional DM-RS symbols for long allocations
    pub additional_dmrs: bool,
    /// Spreading factor (2 or 4)
    pub occ_length: usize,
    /// Orthogonal cover code index
    pub occ_index: usize,
    pub uci: UciPayloadSize,
    /// Receive ports to process
    pub ports: Vec<usize>,
}

impl Format4Configuration {
    pub fn modulation(&self) -> Modulation {
        modulation(self.pi2_bpsk)
    }

    /// Number of coded bits (E) carried by the allocation
    pub fn nof_coded_bits(&self) -> usize {
        let nof_data_symbols = self.allocation.nof_symbols
            - super::format3::dmrs_symbol_mask(
                self.allocation.nof_symbols,
                self.allocation.is_hopping(),
                self.additional_dmrs,
            )
            .nof_symbols();
        nof_data_symbols * (NRE / self.occ_length) * self.modulation().bits_per_symbol()
    }
}

fn modulation(pi2_bpsk: bool) -> Modulation {
    if pi2_bpsk {
        Modulation::PiHalfBpsk
    } else {
        Modulation::Qpsk
    }
}
