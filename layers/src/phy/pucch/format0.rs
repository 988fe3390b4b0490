//! PUCCH Format 0 detector
//!
//! Format 0 carries up to two HARQ-ACK bits and a scheduling request by
//! selecting the cyclic shift of a length-12 sequence (TS 38.213 Section
//! 9.2.3). The detector correlates every received symbol against each
//! candidate shift, keeps the strongest candidate and compares its power to
//! the residual power left outside the sequence.

use common::types::NRE;
use num_complex::Complex32;
use tracing::{debug, trace};

use super::config::Format0Configuration;
use super::csi::{ChannelStateInformation, SinrType};
use super::helper::PucchHelper;
use super::uci::{PucchUciMessage, UciStatus};
use super::PucchDetectionResult;
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{LowPaprSequenceCollection, ShortLowPaprCollection};

/// Largest number of degrees of freedom (ports times symbols) with a calibrated threshold
pub const FORMAT0_MAX_DOF: usize = 8;

/// One hypothesis: the cyclic shift and the UCI it encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format0Candidate {
    /// Sequence cyclic shift m_cs
    pub m_cs: u32,
    pub harq_ack: [u8; 2],
    pub sr: u8,
}

const fn candidate(m_cs: u32, harq_ack: [u8; 2], sr: u8) -> Format0Candidate {
    Format0Candidate { m_cs, harq_ack, sr }
}

/// Positive SR without HARQ-ACK
const TABLE_SR_ONLY: [Format0Candidate; 1] = [candidate(0, [0, 0], 1)];

/// One HARQ-ACK bit (TS 38.213 Table 9.2.3-3)
const TABLE_ONE_ACK: [Format0Candidate; 2] = [candidate(0, [0, 0], 0), candidate(6, [1, 0], 0)];

/// One HARQ-ACK bit in a scheduling request opportunity
const TABLE_ONE_ACK_SR: [Format0Candidate; 4] = [
    candidate(0, [0, 0], 0),
    candidate(6, [1, 0], 0),
    candidate(3, [0, 0], 1),
    candidate(9, [1, 0], 1),
];

/// Two HARQ-ACK bits (TS 38.213 Table 9.2.3-4)
const TABLE_TWO_ACK: [Format0Candidate; 4] = [
    candidate(0, [0, 0], 0),
    candidate(3, [0, 1], 0),
    candidate(6, [1, 1], 0),
    candidate(9, [1, 0], 0),
];

/// Two HARQ-ACK bits in a scheduling request opportunity
const TABLE_TWO_ACK_SR: [Format0Candidate; 8] = [
    candidate(0, [0, 0], 0),
    candidate(3, [0, 1], 0),
    candidate(6, [1, 1], 0),
    candidate(9, [1, 0], 0),
    candidate(1, [0, 0], 1),
    candidate(4, [0, 1], 1),
    candidate(7, [1, 1], 1),
    candidate(10, [1, 0], 1),
];

/// Detection thresholds for a 1 % false alarm probability
///
/// Rows: 1, 2, 4 and 8 candidates. Columns: 1 to 8 degrees of freedom.
const THRESHOLDS: [[f32; FORMAT0_MAX_DOF]; 4] = [
    [5.71, 7.59, 9.29, 10.84, 12.34, 14.06, 15.40, 16.80],
    [6.72, 8.69, 10.33, 11.97, 13.68, 15.13, 16.61, 18.04],
    [7.92, 9.73, 11.47, 13.20, 14.88, 16.45, 17.83, 19.37],
    [9.06, 10.78, 12.60, 14.30, 15.96, 17.68, 19.19, 20.66],
];

/// Candidate table for a HARQ-ACK size and SR opportunity
///
/// Panics for more than two HARQ-ACK bits, or no HARQ-ACK outside an SR opportunity.
pub fn candidate_table(nof_harq_ack: usize, sr_opportunity: bool) -> &'static [Format0Candidate] {
    match (nof_harq_ack, sr_opportunity) {
        (0, true) => &TABLE_SR_ONLY,
        (1, false) => &TABLE_ONE_ACK,
        (1, true) => &TABLE_ONE_ACK_SR,
        (2, false) => &TABLE_TWO_ACK,
        (2, true) => &TABLE_TWO_ACK_SR,
        _ => panic!(
            "Unsupported Format 0 payload: {} HARQ-ACK bits, SR opportunity {}",
            nof_harq_ack, sr_opportunity
        ),
    }
}

/// Detection threshold for a candidate table size and number of degrees of freedom
pub fn detection_threshold(nof_candidates: usize, nof_dof: usize) -> f32 {
    let row = match nof_candidates {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => panic!("Unsupported number of Format 0 candidates {}", nof_candidates),
    };
    assert!(
        (1..=FORMAT0_MAX_DOF).contains(&nof_dof),
        "Unsupported number of Format 0 degrees of freedom {}",
        nof_dof
    );
    THRESHOLDS[row][nof_dof - 1]
}

/// PUCCH Format 0 detector
pub struct Format0Detector {
    helper: PucchHelper,
    sequences: Box<dyn LowPaprSequenceCollection>,
    rx: [Complex32; NRE],
}

impl Format0Detector {
    pub fn new(sequences: Box<dyn LowPaprSequenceCollection>) -> Self {
        assert_eq!(sequences.sequence_length(), NRE, "Format 0 requires length-12 sequences");
        Self {
            helper: PucchHelper::new(),
            sequences,
            rx: [Complex32::new(0.0, 0.0); NRE],
        }
    }

    /// Detect a Format 0 transmission
    pub fn detect(&mut self, grid: &dyn ResourceGridReader, config: &Format0Configuration) -> PucchDetectionResult {
        let candidates = candidate_table(config.nof_harq_ack, config.sr_opportunity);
        let allocation = &config.allocation;
        assert!(!config.ports.is_empty(), "No receive ports");

        let mut correlation = [0.0f32; TABLE_TWO_ACK_SR.len()];
        let mut total_energy = 0.0f32;

        for symbol in 0..allocation.nof_symbols {
            let hop = allocation.hop_of_symbol(symbol);
            let slot_symbol = allocation.slot_symbol(symbol);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            let group = self
                .helper
                .sequence_group(config.group_hopping, &allocation.slot, hop as u32, config.n_id);
            let n_cs = self
                .helper
                .cyclic_shift_hopping(&allocation.slot, allocation.cp, slot_symbol, config.n_id);

            for &port in &config.ports {
                grid.get(&mut self.rx, port, slot_symbol, first_subcarrier);
                total_energy += self.rx.iter().map(|x| x.norm_sqr()).sum::<f32>();

                for (corr, candidate) in correlation.iter_mut().zip(candidates.iter()) {
                    let alpha = (config.initial_cyclic_shift + candidate.m_cs + n_cs) % NRE as u32;
                    let sequence = self.sequences.get(group.u, group.v, alpha);
                    let dot: Complex32 = self
                        .rx
                        .iter()
                        .zip(sequence.iter())
                        .map(|(x, s)| x * s.conj())
                        .sum();
                    *corr += dot.norm_sqr() / NRE as f32;
                }
            }
        }

        let (best_index, best_correlation) = correlation[..candidates.len()]
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, c)| if c > best.1 { (i, c) } else { best });

        let nof_dof = allocation.nof_symbols * config.ports.len();
        let residual = (total_energy - best_correlation).max(0.0);
        let noise_var = residual / ((NRE - 1) * nof_dof) as f32;
        let metric = if noise_var > 0.0 {
            best_correlation / noise_var
        } else if best_correlation > 0.0 {
            f32::INFINITY
        } else {
            0.0
        };
        let threshold = detection_threshold(candidates.len(), nof_dof);

        trace!(
            "Format 0 correlations {:?}, residual {:.3e}",
            &correlation[..candidates.len()],
            residual
        );

        let mut message = PucchUciMessage::new(usize::from(config.sr_opportunity), config.nof_harq_ack, 0, 0);
        if metric > threshold {
            let best = &candidates[best_index];
            message
                .harq_ack_bits_mut()
                .copy_from_slice(&best.harq_ack[..config.nof_harq_ack]);
            if let Some(sr) = message.sr_bits_mut().first_mut() {
                *sr = best.sr;
            }
            message.set_status(UciStatus::Valid);
        } else {
            message.set_status(UciStatus::Invalid);
        }

        let nof_re = (NRE * nof_dof) as f32;
        let rsrp = best_correlation / nof_re;
        let mut csi = ChannelStateInformation::new(SinrType::ChannelEstimator);
        csi.set_epre(total_energy / nof_re);
        csi.set_rsrp(rsrp);
        if noise_var > 0.0 {
            csi.set_sinr_ch_estimator(rsrp / noise_var);
        }

        debug!(
            "Format 0 detection: m_cs={}, metric={:.2}, threshold={:.2}, status={:?}",
            candidates[best_index].m_cs,
            metric,
            threshold,
            message.status()
        );

        PucchDetectionResult {
            uci_message: message,
            detection_metric: Some(metric),
            csi,
        }
    }
}

impl Default for Format0Detector {
    fn default() -> Self {
        Self::new(Box::new(ShortLowPaprCollection::new()))
    }
}

impl std::fmt::Debug for Format0Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format0Detector").finish_non_exhaustive()
    }
}
