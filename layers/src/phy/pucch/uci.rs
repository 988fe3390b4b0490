//! Uplink control information message
//!
//! Container for the UCI fields decoded from a PUCCH transmission.

use serde::{Deserialize, Serialize};

/// Outcome of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UciStatus {
    /// Not processed
    #[default]
    Unknown,
    /// Detected above threshold
    Valid,
    /// Below detection threshold
    Invalid,
}

/// UCI message with SR, HARQ-ACK and CSI fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PucchUciMessage {
    status: UciStatus,
    sr: Vec<u8>,
    harq_ack: Vec<u8>,
    csi_part1: Vec<u8>,
    csi_part2: Vec<u8>,
}

impl PucchUciMessage {
    /// Create a message with zeroed fields of the given sizes and unknown status
    pub fn new(nof_sr: usize, nof_harq_ack: usize, nof_csi_part1: usize, nof_csi_part2: usize) -> Self {
        Self {
            status: UciStatus::Unknown,
            sr: vec![0; nof_sr],
            harq_ack: vec![0; nof_harq_ack],
            csi_part1: vec![0; nof_csi_part1],
            csi_part2: vec![0; nof_csi_part2],
        }
    }

    pub fn status(&self) -> UciStatus {
        self.status
    }

    pub fn set_status(&mut self, status: UciStatus) {
        self.status = status;
    }

    pub fn is_valid(&self) -> bool {
        self.status == UciStatus::Valid
    }

    pub fn nof_sr(&self) -> usize {
        self.sr.len()
    }

    pub fn nof_harq_ack(&self) -> usize {
        self.harq_ack.len()
    }

    pub fn nof_csi_part1(&self) -> usize {
        self.csi_part1.len()
    }

    pub fn nof_csi_part2(&self) -> usize {
        self.csi_part2.len()
    }

    pub fn sr_bits(&self) -> &[u8] {
        &self.sr
    }

    pub fn sr_bits_mut(&mut self) -> &mut [u8] {
        &mut self.sr
    }

    pub fn harq_ack_bits(&self) -> &[u8] {
        &self.harq_ack
    }

    pub fn harq_ack_bits_mut(&mut self) -> &mut [u8] {
        &mut self.harq_ack
    }

    pub fn csi_part1_bits(&self) -> &[u8] {
        &self.csi_part1
    }

    pub fn csi_part2_bits(&self) -> &[u8] {
        &self.csi_part2
    }

    /// Whether a positive scheduling request was decoded
    pub fn has_positive_sr(&self) -> bool {
        self.sr.first() == Some(&1)
    }
}
