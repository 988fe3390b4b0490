//! PUCCH configuration validator
//!
//! Range checks that can run before any samples are touched, so malformed
//! grants are rejected up front. The processor runs the same checks and treats
//! a failure as a fatal precondition.

use common::types::{MAX_PORTS, MAX_RB, NRE};
use thiserror::Error;

use super::config::{
    Format0Configuration, Format1Configuration, Format2Configuration, Format3Configuration, Format4Configuration,
    PucchAllocation, PucchFormat, UciPayloadSize,
};
use super::format1::hop_layout;
use super::format2::{FORMAT2_MAX_NOF_PRB, FORMAT2_MAX_NOF_SYMBOLS};
use super::format3::{FORMAT3_MAX_NOF_PRB, FORMAT3_MAX_NOF_SYMBOLS, FORMAT3_MIN_NOF_SYMBOLS};
use super::format4::is_valid_occ_length;
use crate::phy::transform_precoder::is_valid_nof_prb;

/// Largest scrambling and hopping identifier
pub const MAX_N_ID: u32 = 1023;

/// Largest Format 2 DM-RS scrambling identifier
pub const MAX_N_ID_0: u32 = 65535;

/// Rejected PUCCH configuration field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PucchConfigError {
    #[error("{format:?}: {nof_symbols} symbols outside {min}..={max}")]
    SymbolCount {
        format: PucchFormat,
        nof_symbols: usize,
        min: usize,
        max: usize,
    },

    #[error("Symbols {start}..{end} exceed the {slot_len} symbols of the slot")]
    SymbolRange { start: usize, end: usize, slot_len: usize },

    #[error("Bandwidth part {start}+{size} outside the carrier")]
    BandwidthPart { start: usize, size: usize },

    #[error("PRB {prb} with {nof_prb} PRB exceeds the bandwidth part of {bwp_size} PRB")]
    PrbAllocation { prb: usize, nof_prb: usize, bwp_size: usize },

    #[error("{format:?}: invalid PRB count {nof_prb}")]
    PrbCount { format: PucchFormat, nof_prb: usize },

    #[error("{format:?}: frequency hopping needs two symbols, got {nof_symbols}")]
    HoppingSymbols { format: PucchFormat, nof_symbols: usize },

    #[error("Invalid number of receive ports {0}")]
    Ports(usize),

    #[error("Initial cyclic shift {0} outside 0..12")]
    CyclicShift(u32),

    #[error("Time domain OCC {occ} not below the spreading factor {max}")]
    TimeDomainOcc { occ: u32, max: usize },

    #[error("{0} HARQ-ACK bits exceed the maximum of 2")]
    HarqAckSize(usize),

    #[error("No UCI to detect")]
    EmptyPayload,

    #[error("Format 1 configuration without multiplexed transmissions")]
    NoTransmissions,

    #[error("UCI payload of {payload} bits exceeds the capacity of {capacity} coded bits")]
    PayloadSize { payload: usize, capacity: usize },

    #[error("Invalid OCC {index} of length {length}")]
    Occ { length: usize, index: usize },

    #[error("Identifier {value} exceeds {max}")]
    Identifier { value: u32, max: u32 },
}

/// Validates PUCCH configurations against the supported ranges
#[derive(Debug, Clone, Copy)]
pub struct PucchPduValidator {
    max_nof_ports: usize,
}

impl PucchPduValidator {
    pub fn new(max_nof_ports: usize) -> Self {
        Self {
            max_nof_ports: max_nof_ports.clamp(1, MAX_PORTS),
        }
    }

    pub fn validate_format0(&self, config: &Format0Configuration) -> Result<(), PucchConfigError> {
        let allocation = &config.allocation;
        self.check_allocation(PucchFormat::Format0, allocation, 1, 2, 1, &config.ports)?;
        check_two_symbol_hopping(PucchFormat::Format0, allocation)?;
        check_identifier(config.n_id, MAX_N_ID)?;
        if config.initial_cyclic_shift >= NRE as u32 {
            return Err(PucchConfigError::CyclicShift(config.initial_cyclic_shift));
        }
        if config.nof_harq_ack > 2 {
            return Err(PucchConfigError::HarqAckSize(config.nof_harq_ack));
        }
        if config.nof_harq_ack == 0 && !config.sr_opportunity {
            return Err(PucchConfigError::EmptyPayload);
        }
        Ok(())
    }

    pub fn validate_format1(&self, config: &Format1Configuration) -> Result<(), PucchConfigError> {
        let allocation = &config.allocation;
        self.check_allocation(PucchFormat::Format1, allocation, 4, 14, 1, &config.ports)?;
        check_identifier(config.n_id, MAX_N_ID)?;
        if config.ue_parameters.is_empty() {
            return Err(PucchConfigError::NoTransmissions);
        }

        let max_occ = (0..allocation.nof_hops())
            .map(|hop| {
                let (nof_dmrs, nof_data) = hop_layout(allocation, hop);
                nof_dmrs.min(nof_data)
            })
            .min()
            .unwrap_or(0);

        for (key, parameters) in &config.ue_parameters {
            if key.initial_cyclic_shift >= NRE as u32 {
                return Err(PucchConfigError::CyclicShift(key.initial_cyclic_shift));
            }
            if key.time_domain_occ as usize >= max_occ {
                return Err(PucchConfigError::TimeDomainOcc {
                    occ: key.time_domain_occ,
                    max: max_occ,
                });
            }
            if parameters.nof_harq_ack > 2 {
                return Err(PucchConfigError::HarqAckSize(parameters.nof_harq_ack));
            }
        }
        Ok(())
    }

    pub fn validate_format2(&self, config: &Format2Configuration) -> Result<(), PucchConfigError> {
        let allocation = &config.allocation;
        if !(1..=FORMAT2_MAX_NOF_PRB).contains(&config.nof_prb) {
            return Err(PucchConfigError::PrbCount {
                format: PucchFormat::Format2,
                nof_prb: config.nof_prb,
            });
        }
        self.check_allocation(
            PucchFormat::Format2,
            allocation,
            1,
            FORMAT2_MAX_NOF_SYMBOLS,
            config.nof_prb,
            &config.ports,
        )?;
        check_two_symbol_hopping(PucchFormat::Format2, allocation)?;
        check_identifier(config.n_id, MAX_N_ID)?;
        check_identifier(config.n_id_0, MAX_N_ID_0)?;
        check_payload(&config.uci, config.nof_coded_bits())
    }

    pub fn validate_format3(&self, config: &Format3Configuration) -> Result<(), PucchConfigError> {
        if !(config.nof_prb <= FORMAT3_MAX_NOF_PRB && is_valid_nof_prb(config.nof_prb)) {
            return Err(PucchConfigError::PrbCount {
                format: PucchFormat::Format3,
                nof_prb: config.nof_prb,
            });
        }
        self.check_allocation(
            PucchFormat::Format3,
            &config.allocation,
            FORMAT3_MIN_NOF_SYMBOLS,
            FORMAT3_MAX_NOF_SYMBOLS,
            config.nof_prb,
            &config.ports,
        )?;
        check_identifier(config.n_id, MAX_N_ID)?;
        check_identifier(config.n_id_hopping, MAX_N_ID)?;
        check_payload(&config.uci, config.nof_coded_bits())
    }

    pub fn validate_format4(&self, config: &Format4Configuration) -> Result<(), PucchConfigError> {
        self.check_allocation(
            PucchFormat::Format4,
            &config.allocation,
            FORMAT3_MIN_NOF_SYMBOLS,
            FORMAT3_MAX_NOF_SYMBOLS,
            1,
            &config.ports,
        )?;
        if !is_valid_occ_length(config.occ_length) || config.occ_index >= config.occ_length {
            return Err(PucchConfigError::Occ {
                length: config.occ_length,
                index: config.occ_index,
            });
        }
        check_identifier(config.n_id, MAX_N_ID)?;
        check_identifier(config.n_id_hopping, MAX_N_ID)?;
        check_payload(&config.uci, config.nof_coded_bits())
    }

    fn check_allocation(
        &self,
        format: PucchFormat,
        allocation: &PucchAllocation,
        min_symbols: usize,
        max_symbols: usize,
        nof_prb: usize,
        ports: &[usize],
    ) -> Result<(), PucchConfigError> {
        if ports.is_empty() || ports.len() > self.max_nof_ports {
            return Err(PucchConfigError::Ports(ports.len()));
        }

        if !(min_symbols..=max_symbols).contains(&allocation.nof_symbols) {
            return Err(PucchConfigError::SymbolCount {
                format,
                nof_symbols: allocation.nof_symbols,
                min: min_symbols,
                max: max_symbols,
            });
        }
        let slot_len = allocation.cp.nof_symbols_per_slot();
        let end = allocation.start_symbol_index + allocation.nof_symbols;
        if end > slot_len {
            return Err(PucchConfigError::SymbolRange {
                start: allocation.start_symbol_index,
                end,
                slot_len,
            });
        }

        if allocation.bwp_size_rb == 0 || allocation.bwp_start_rb + allocation.bwp_size_rb > MAX_RB {
            return Err(PucchConfigError::BandwidthPart {
                start: allocation.bwp_start_rb,
                size: allocation.bwp_size_rb,
            });
        }
        for prb in std::iter::once(allocation.starting_prb).chain(allocation.second_hop_prb) {
            if prb + nof_prb > allocation.bwp_size_rb {
                return Err(PucchConfigError::PrbAllocation {
                    prb,
                    nof_prb,
                    bwp_size: allocation.bwp_size_rb,
                });
            }
        }
        Ok(())
    }
}

impl Default for PucchPduValidator {
    fn default() -> Self {
        Self::new(MAX_PORTS)
    }
}

fn check_two_symbol_hopping(format: PucchFormat, allocation: &PucchAllocation) -> Result<(), PucchConfigError> {
    if allocation.is_hopping() && allocation.nof_symbols != 2 {
        return Err(PucchConfigError::HoppingSymbols {
            format,
            nof_symbols: allocation.nof_symbols,
        });
    }
    Ok(())
}

fn check_identifier(value: u32, max: u32) -> Result<(), PucchConfigError> {
    if value > max {
        return Err(PucchConfigError::Identifier { value, max });
    }
    Ok(())
}

fn check_payload(uci: &UciPayloadSize, capacity: usize) -> Result<(), PucchConfigError> {
    let payload = uci.total();
    if payload == 0 {
        return Err(PucchConfigError::EmptyPayload);
    }
    if payload > capacity {
        return Err(PucchConfigError::PayloadSize { payload, capacity });
    }
    Ok(())
}
