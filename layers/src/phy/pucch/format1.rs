//! PUCCH Format 1 detector
//!
//! Format 1 spreads one BPSK or QPSK symbol over a length-12 sequence in
//! frequency and an orthogonal cover code in time (TS 38.211 Section
//! 6.3.2.4). Several UEs share the same resource using different initial
//! cyclic shifts and time-domain OCCs, so the detector despreads all of them
//! at once:
//!
//! 1. Every symbol is multiplied by the conjugate base sequence and
//!    transformed with a 12-point DFT, which places each cyclic shift in its
//!    own bin.
//! 2. For every OCC in use by a requested pair, the DM-RS and data symbols
//!    of each hop are despread with the conjugate OCC in all twelve shift
//!    bins, listed or not.
//! 3. The DM-RS of all bins that stand out of the noise and are not far below
//!    the strongest one are rebuilt and subtracted from the received DM-RS to
//!    estimate the noise variance.
//! 4. For each pair the transmitted symbol is decided and the combined
//!    DM-RS and data energy, normalised by the noise, is compared to a
//!    threshold.

use common::types::{MAX_NSYMB_PER_SLOT, MAX_PORTS, NRE};
use num_complex::Complex32;
use rustfft::FftPlanner;
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_1_SQRT_2, PI};
use tracing::{debug, trace, warn};

use super::config::{Format1Configuration, Format1MultiplexKey, PucchAllocation};
use super::csi::{ChannelStateInformation, SinrType};
use super::helper::PucchHelper;
use super::uci::{PucchUciMessage, UciStatus};
use super::PucchDetectionResult;
use crate::phy::dft::{DftDirection, DftProcessor};
use crate::phy::resource_grid::ResourceGridReader;
use crate::phy::sequences::{LowPaprSequenceCollection, ShortLowPaprCollection};
use crate::LayerError;

/// Results of a Format 1 detection, one entry per multiplexed transmission
pub type Format1BatchResult = BTreeMap<Format1MultiplexKey, PucchDetectionResult>;

/// Maximum spreading factor of the time-domain OCC
pub const MAX_SPREADING_FACTOR: usize = 7;

/// Pairs whose channel energy is more than 10 dB below the strongest are not rebuilt
const SUPPRESSION_RATIO: f32 = 0.1;

/// Bins must exceed the average DM-RS bin energy by 6 dB to be rebuilt
const OCCUPANCY_RATIO: f32 = 4.0;

/// Lower bound of the noise variance relative to the EPRE
const NOISE_FLOOR_RATIO: f32 = 1e-6;

/// Calibrated thresholds by number of ports times hops
const THRESHOLDS: [(usize, f32); 4] = [(1, 0.90), (2, 3.00), (4, 4.45), (8, 6.95)];

/// OCC phases in units of 2π/N_SF (TS 38.211 Table 6.3.2.4.1-2)
///
/// Indexed by [N_SF - 1][OCC index][symbol].
const OCC_PHASES: [[[u8; MAX_SPREADING_FACTOR]; MAX_SPREADING_FACTOR]; MAX_SPREADING_FACTOR] = [
    [[0; 7], [0; 7], [0; 7], [0; 7], [0; 7], [0; 7], [0; 7]],
    [[0, 0, 0, 0, 0, 0, 0], [0, 1, 0, 0, 0, 0, 0], [0; 7], [0; 7], [0; 7], [0; 7], [0; 7]],
    [
        [0, 0, 0, 0, 0, 0, 0],
        [0, 1, 2, 0, 0, 0, 0],
        [0, 2, 1, 0, 0, 0, 0],
        [0; 7],
        [0; 7],
        [0; 7],
        [0; 7],
    ],
    [
        [0, 0, 0, 0, 0, 0, 0],
        [0, 2, 0, 2, 0, 0, 0],
        [0, 0, 2, 2, 0, 0, 0],
        [0, 2, 2, 0, 0, 0, 0],
        [0; 7],
        [0; 7],
        [0; 7],
    ],
    [
        [0, 0, 0, 0, 0, 0, 0],
        [0, 1, 2, 3, 4, 0, 0],
        [0, 2, 4, 1, 3, 0, 0],
        [0, 3, 1, 4, 2, 0, 0],
        [0, 4, 3, 2, 1, 0, 0],
        [0; 7],
        [0; 7],
    ],
    [
        [0, 0, 0, 0, 0, 0, 0],
        [0, 1, 2, 3, 4, 5, 0],
        [0, 2, 4, 0, 2, 4, 0],
        [0, 3, 0, 3, 0, 3, 0],
        [0, 4, 2, 0, 4, 2, 0],
        [0, 5, 4, 3, 2, 1, 0],
        [0; 7],
    ],
    [
        [0, 0, 0, 0, 0, 0, 0],
        [0, 1, 2, 3, 4, 5, 6],
        [0, 2, 4, 6, 1, 3, 5],
        [0, 3, 6, 2, 5, 1, 4],
        [0, 4, 1, 5, 2, 6, 3],
        [0, 5, 3, 1, 6, 4, 2],
        [0, 6, 5, 4, 3, 2, 1],
    ],
];

/// Time-domain OCC coefficient w_i(m) for spreading factor `spreading_factor`
pub fn occ_coefficient(spreading_factor: usize, index: usize, m: usize) -> Complex32 {
    assert!(
        (1..=MAX_SPREADING_FACTOR).contains(&spreading_factor),
        "Invalid OCC spreading factor {}",
        spreading_factor
    );
    assert!(
        index < spreading_factor,
        "OCC index {} not available for spreading factor {}",
        index,
        spreading_factor
    );
    assert!(m < spreading_factor, "OCC symbol {} out of range", m);

    let phase = OCC_PHASES[spreading_factor - 1][index][m] as f32;
    Complex32::from_polar(1.0, 2.0 * PI * phase / spreading_factor as f32)
}

/// Number of DM-RS and data symbols in a hop
///
/// DM-RS occupies the even symbols of the allocation.
pub fn hop_layout(allocation: &PucchAllocation, hop: usize) -> (usize, usize) {
    let symbols = allocation.hop_symbols(hop);
    let nof_dmrs = symbols.clone().filter(|symbol| symbol % 2 == 0).count();
    (nof_dmrs, symbols.len() - nof_dmrs)
}

/// Detection threshold for a number of ports times hops
///
/// Counts without a calibrated value are linearly interpolated.
pub fn detection_threshold(nof_dof: usize) -> f32 {
    let max_dof = THRESHOLDS[THRESHOLDS.len() - 1].0;
    assert!(
        (1..=max_dof).contains(&nof_dof),
        "Unsupported number of Format 1 degrees of freedom {}",
        nof_dof
    );

    if let Some(&(_, threshold)) = THRESHOLDS.iter().find(|(dof, _)| *dof == nof_dof) {
        return threshold;
    }

    warn!(
        "No calibrated Format 1 threshold for {} degrees of freedom, interpolating",
        nof_dof
    );
    let upper = THRESHOLDS
        .iter()
        .position(|(dof, _)| *dof > nof_dof)
        .unwrap_or(THRESHOLDS.len() - 1);
    let (dof_lo, th_lo) = THRESHOLDS[upper - 1];
    let (dof_hi, th_hi) = THRESHOLDS[upper];
    th_lo + (th_hi - th_lo) * (nof_dof - dof_lo) as f32 / (dof_hi - dof_lo) as f32
}

/// Despread values of one (cyclic shift, OCC) bin
#[derive(Debug, Clone, Copy, Default)]
struct Despread {
    /// DM-RS combination per hop and port
    dmrs: [[Complex32; MAX_PORTS]; 2],
    /// Data combination per hop and port
    data: [[Complex32; MAX_PORTS]; 2],
    /// Excluded from the DM-RS reconstruction of a hop
    suppressed: [bool; 2],
}

/// Hard decision of the Format 1 symbol that best matches the cross term
fn decide_symbol(cross: Complex32, nof_harq_ack: usize) -> (Complex32, [u8; 2]) {
    if nof_harq_ack == 2 {
        let b0 = u8::from(cross.re < 0.0);
        let b1 = u8::from(cross.im < 0.0);
        let symbol = Complex32::new(
            (1.0 - 2.0 * b0 as f32) * FRAC_1_SQRT_2,
            (1.0 - 2.0 * b1 as f32) * FRAC_1_SQRT_2,
        );
        (symbol, [b0, b1])
    } else {
        let b = u8::from(cross.re + cross.im < 0.0);
        let amplitude = (1.0 - 2.0 * b as f32) * FRAC_1_SQRT_2;
        (Complex32::new(amplitude, amplitude), [b, 0])
    }
}

/// PUCCH Format 1 detector
pub struct Format1Detector {
    helper: PucchHelper,
    sequences: Box<dyn LowPaprSequenceCollection>,
    dft: DftProcessor,
    idft: DftProcessor,
    /// Received resource elements [symbol][port][subcarrier]
    rx: [[[Complex32; NRE]; MAX_PORTS]; MAX_NSYMB_PER_SLOT],
    /// Base sequence of every symbol
    base: [[Complex32; NRE]; MAX_NSYMB_PER_SLOT],
    /// Cyclic shift spectra [symbol][port][shift]
    spectra: [[[Complex32; NRE]; MAX_PORTS]; MAX_NSYMB_PER_SLOT],
    /// Distinct OCC indices of the requested pairs
    occs: Vec<usize>,
    /// Despread bins indexed by OCC slot times NRE plus cyclic shift
    despread: Vec<Despread>,
}

impl Format1Detector {
    pub fn new(sequences: Box<dyn LowPaprSequenceCollection>) -> Result<Self, LayerError> {
        if sequences.sequence_length() != NRE {
            return Err(LayerError::InvalidConfiguration(
                "Format 1 requires length-12 sequences".to_string(),
            ));
        }

        let mut planner = FftPlanner::new();
        let zero = Complex32::new(0.0, 0.0);
        Ok(Self {
            helper: PucchHelper::new(),
            sequences,
            dft: DftProcessor::new(&mut planner, NRE, DftDirection::Forward)?,
            idft: DftProcessor::new(&mut planner, NRE, DftDirection::Inverse)?,
            rx: [[[zero; NRE]; MAX_PORTS]; MAX_NSYMB_PER_SLOT],
            base: [[zero; NRE]; MAX_NSYMB_PER_SLOT],
            spectra: [[[zero; NRE]; MAX_PORTS]; MAX_NSYMB_PER_SLOT],
            occs: Vec::with_capacity(MAX_SPREADING_FACTOR),
            despread: Vec::with_capacity(NRE * MAX_SPREADING_FACTOR),
        })
    }

    /// Detect every transmission listed in the configuration
    pub fn detect(&mut self, grid: &dyn ResourceGridReader, config: &Format1Configuration) -> Format1BatchResult {
        let allocation = &config.allocation;
        let nof_ports = config.ports.len();
        let nof_hops = allocation.nof_hops();
        assert!(!config.ue_parameters.is_empty(), "No multiplexed transmissions to detect");
        assert!(
            (1..=MAX_PORTS).contains(&nof_ports),
            "Invalid number of receive ports {}",
            nof_ports
        );
        assert!(
            allocation.nof_symbols <= MAX_NSYMB_PER_SLOT,
            "Invalid number of symbols {}",
            allocation.nof_symbols
        );

        let scale = 1.0 / (NRE as f32).sqrt();
        let mut energy = [0.0f32; 2];
        let mut nof_re = [0usize; 2];
        let mut dmrs_energy = [0.0f32; 2];

        // Shift spectra of every symbol and port
        for symbol in 0..allocation.nof_symbols {
            let hop = allocation.hop_of_symbol(symbol);
            let slot_symbol = allocation.slot_symbol(symbol);
            let first_subcarrier = allocation.hop_first_subcarrier(hop);
            let group = self
                .helper
                .sequence_group(config.group_hopping, &allocation.slot, hop as u32, config.n_id);
            let alpha = self
                .helper
                .cyclic_shift_hopping(&allocation.slot, allocation.cp, slot_symbol, config.n_id)
                % NRE as u32;
            self.base[symbol].copy_from_slice(self.sequences.get(group.u, group.v, alpha));

            for (port_index, &port) in config.ports.iter().enumerate() {
                let rx = &mut self.rx[symbol][port_index];
                grid.get(rx, port, slot_symbol, first_subcarrier);
                let rx_energy = rx.iter().map(|x| x.norm_sqr()).sum::<f32>();
                energy[hop] += rx_energy;
                nof_re[hop] += NRE;
                if symbol % 2 == 0 {
                    dmrs_energy[hop] += rx_energy;
                }

                let input = self.dft.input_mut();
                for ((z, x), r) in input.iter_mut().zip(rx.iter()).zip(self.base[symbol].iter()) {
                    *z = x * r.conj();
                }
                for (bin, value) in self.spectra[symbol][port_index].iter_mut().zip(self.dft.run().iter()) {
                    *bin = value * scale;
                }
            }
        }

        // Despread all cyclic shifts of every requested OCC
        self.occs.clear();
        for key in config.ue_parameters.keys() {
            assert!(
                (key.initial_cyclic_shift as usize) < NRE,
                "Invalid initial cyclic shift {}",
                key.initial_cyclic_shift
            );
            let occ = key.time_domain_occ as usize;
            if !self.occs.contains(&occ) {
                self.occs.push(occ);
            }
        }
        self.despread.clear();
        self.despread.resize(self.occs.len() * NRE, Despread::default());
        for (occ_slot, &occ) in self.occs.iter().enumerate() {
            let bins = &mut self.despread[occ_slot * NRE..(occ_slot + 1) * NRE];
            for hop in 0..nof_hops {
                let (nof_dmrs, nof_data) = hop_layout(allocation, hop);
                let (mut m_dmrs, mut m_data) = (0, 0);
                for symbol in allocation.hop_symbols(hop) {
                    let is_dmrs = symbol % 2 == 0;
                    let weight = if is_dmrs {
                        m_dmrs += 1;
                        occ_coefficient(nof_dmrs, occ, m_dmrs - 1).conj()
                    } else {
                        m_data += 1;
                        occ_coefficient(nof_data, occ, m_data - 1).conj()
                    };
                    for (port_index, spectrum) in self.spectra[symbol][..nof_ports].iter().enumerate() {
                        for (bin, value) in bins.iter_mut().zip(spectrum.iter()) {
                            let target = if is_dmrs {
                                &mut bin.dmrs[hop][port_index]
                            } else {
                                &mut bin.data[hop][port_index]
                            };
                            *target += value * weight;
                        }
                    }
                }
            }
        }

        // Rebuild only the bins that stand out of the noise and are not far below the strongest
        let mut nof_rebuilt = [0usize; 2];
        for hop in 0..nof_hops {
            let (nof_dmrs, _) = hop_layout(allocation, hop);
            let bin_energy = |bin: &Despread| -> f32 {
                bin.dmrs[hop][..nof_ports].iter().map(|s| s.norm_sqr()).sum::<f32>() / nof_dmrs as f32
            };
            let average = dmrs_energy[hop] / (NRE * nof_dmrs) as f32;
            let strongest = self.despread.iter().map(bin_energy).fold(0.0f32, f32::max);
            for bin in self.despread.iter_mut() {
                let power = bin_energy(&*bin);
                bin.suppressed[hop] = power <= average * OCCUPANCY_RATIO || power < strongest * SUPPRESSION_RATIO;
                nof_rebuilt[hop] += usize::from(!bin.suppressed[hop]);
            }
        }

        // Noise from the DM-RS reconstruction error
        let mut noise = [0.0f32; 2];
        let mut nof_noise_dof = [0usize; 2];
        for hop in 0..nof_hops {
            let (nof_dmrs, _) = hop_layout(allocation, hop);
            for (m, symbol) in allocation.hop_symbols(hop).filter(|s| s % 2 == 0).enumerate() {
                for port_index in 0..nof_ports {
                    let input = self.idft.input_mut();
                    input.fill(Complex32::new(0.0, 0.0));
                    for (occ_slot, &occ) in self.occs.iter().enumerate() {
                        let weight = occ_coefficient(nof_dmrs, occ, m) / nof_dmrs as f32;
                        let bins = &self.despread[occ_slot * NRE..(occ_slot + 1) * NRE];
                        for (z, bin) in input.iter_mut().zip(bins.iter()) {
                            if !bin.suppressed[hop] {
                                *z += bin.dmrs[hop][port_index] * weight;
                            }
                        }
                    }

                    let rebuilt = self.idft.run();
                    for ((x, z), r) in self.rx[symbol][port_index]
                        .iter()
                        .zip(rebuilt.iter())
                        .zip(self.base[symbol].iter())
                    {
                        noise[hop] += (x - z * scale * r).norm_sqr();
                    }
                }
            }
            // Every rebuilt bin fits one coefficient per port
            nof_noise_dof[hop] = nof_ports * (NRE * nof_dmrs).saturating_sub(nof_rebuilt[hop]);
            trace!(
                "Format 1 hop {}: EPRE {:.3e}, DM-RS residual {:.3e}, {} bins rebuilt",
                hop,
                energy[hop] / nof_re[hop].max(1) as f32,
                noise[hop] / nof_noise_dof[hop].max(1) as f32,
                nof_rebuilt[hop]
            );
        }

        let epre = energy.iter().sum::<f32>() / nof_re.iter().sum::<usize>() as f32;
        let noise_var = (noise.iter().sum::<f32>() / nof_noise_dof.iter().sum::<usize>().max(1) as f32)
            .max(epre * NOISE_FLOOR_RATIO)
            .max(f32::MIN_POSITIVE);

        let nof_dof = nof_ports * nof_hops;
        let threshold = detection_threshold(nof_dof);

        let mut results = Format1BatchResult::new();
        for (key, parameters) in config.ue_parameters.iter() {
            assert!(
                parameters.nof_harq_ack <= 2,
                "Format 1 carries at most two HARQ-ACK bits, got {}",
                parameters.nof_harq_ack
            );
            let occ_slot = self
                .occs
                .iter()
                .position(|&occ| occ == key.time_domain_occ as usize)
                .unwrap_or_default();
            let ue = &self.despread[occ_slot * NRE + key.initial_cyclic_shift as usize];

            let mut main = 0.0f32;
            let mut cross = Complex32::new(0.0, 0.0);
            let mut rsrp = 0.0f32;
            for hop in 0..nof_hops {
                let (nof_dmrs, nof_data) = hop_layout(allocation, hop);
                let norm = (nof_dmrs + nof_data) as f32;
                for port_index in 0..nof_ports {
                    let dmrs = ue.dmrs[hop][port_index];
                    let data = ue.data[hop][port_index];
                    main += (dmrs.norm_sqr() + data.norm_sqr()) / norm;
                    cross += dmrs.conj() * data / norm;
                    rsrp += (dmrs / nof_dmrs as f32).norm_sqr() / NRE as f32;
                }
            }
            rsrp /= nof_dof as f32;

            let (symbol, bits) = decide_symbol(cross, parameters.nof_harq_ack);
            let metric = (main + 2.0 * (symbol.conj() * cross).re) / noise_var - nof_dof as f32;
            let detected = metric > threshold;

            let message = if parameters.nof_harq_ack == 0 {
                let mut message = PucchUciMessage::new(1, 0, 0, 0);
                if detected && bits[0] == 0 {
                    message.sr_bits_mut()[0] = 1;
                    message.set_status(UciStatus::Valid);
                } else {
                    message.set_status(UciStatus::Invalid);
                }
                message
            } else {
                let mut message = PucchUciMessage::new(0, parameters.nof_harq_ack, 0, 0);
                if detected {
                    message
                        .harq_ack_bits_mut()
                        .copy_from_slice(&bits[..parameters.nof_harq_ack]);
                    message.set_status(UciStatus::Valid);
                } else {
                    message.set_status(UciStatus::Invalid);
                }
                message
            };

            let mut csi = ChannelStateInformation::new(SinrType::ChannelEstimator);
            csi.set_epre(epre);
            csi.set_rsrp(rsrp);
            csi.set_sinr_ch_estimator(rsrp / noise_var);

            debug!(
                "Format 1 detection: cs={}, occ={}, metric={:.2}, threshold={:.2}, status={:?}",
                key.initial_cyclic_shift,
                key.time_domain_occ,
                metric,
                threshold,
                message.status()
            );

            results.insert(
                *key,
                PucchDetectionResult {
                    uci_message: message,
                    detection_metric: Some(metric),
                    csi,
                },
            );
        }

        results
    }
}

impl Default for Format1Detector {
    fn default() -> Self {
        match Self::new(Box::new(ShortLowPaprCollection::new())) {
            Ok(detector) => detector,
            Err(e) => panic!("Length-12 sequences always build a Format 1 detector: {}", e),
        }
    }
}

impl std::fmt::Debug for Format1Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format1Detector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::pucch::config::{Format1UeParameters, GroupHopping};
    use crate::phy::pucch::modulator::PucchModulator;
    use crate::phy::resource_grid::{ResourceGrid, ResourceGridReader};
    use common::types::{CyclicPrefix, SlotPoint, SubcarrierSpacing};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config(
        nof_symbols: usize,
        second_hop_prb: Option<usize>,
        ports: Vec<usize>,
        ues: &[(u32, u32, usize)],
    ) -> Format1Configuration {
        Format1Configuration {
            allocation: PucchAllocation {
                slot: SlotPoint::new(SubcarrierSpacing::Scs15, 100, 4).unwrap(),
                cp: CyclicPrefix::Normal,
                bwp_start_rb: 5,
                bwp_size_rb: 20,
                starting_prb: 1,
                second_hop_prb,
                start_symbol_index: 14 - nof_symbols,
                nof_symbols,
            },
            n_id: 1,
            group_hopping: GroupHopping::Neither,
            ue_parameters: ues
                .iter()
                .map(|&(cs, occ, nof_harq_ack)| (Format1MultiplexKey::new(cs, occ), Format1UeParameters { nof_harq_ack }))
                .collect(),
            ports,
        }
    }

    fn add_noise(grid: &mut ResourceGrid, noise_var: f32, rng: &mut StdRng) {
        let sigma = (noise_var / 2.0).sqrt();
        for port in 0..grid.nof_ports() {
            for symbol in 0..grid.nof_symbols() {
                for subc in 0..grid.nof_subc() {
                    // Box-Muller
                    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
                    let u2: f32 = rng.gen_range(0.0..1.0);
                    let r = (-2.0 * u1.ln()).sqrt() * sigma;
                    let noise = Complex32::from_polar(r, 2.0 * PI * u2);
                    let value = grid.get_re(port, symbol, subc);
                    grid.put_re(port, symbol, subc, value + noise);
                }
            }
        }
    }

    #[test]
    fn test_two_multiplexed_ues() {
        let config = config(14, None, vec![0], &[(0, 0, 2), (6, 0, 2)]);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(1, 14, 25);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(0, 0), &[1, 0], &[Complex32::new(1.0, 0.0)]);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(6, 0), &[0, 1], &[Complex32::new(0.0, 1.0)]);

        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        assert_eq!(results.len(), 2);

        let first = &results[&Format1MultiplexKey::new(0, 0)];
        assert_eq!(first.uci_message.status(), UciStatus::Valid);
        assert_eq!(first.uci_message.harq_ack_bits(), &[1, 0]);

        let second = &results[&Format1MultiplexKey::new(6, 0)];
        assert_eq!(second.uci_message.status(), UciStatus::Valid);
        assert_eq!(second.uci_message.harq_ack_bits(), &[0, 1]);
        assert!((second.csi.rsrp().unwrap() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_result_keys_match_requested_keys() {
        let ues = [(0, 0, 1), (6, 0, 2), (3, 1, 0), (9, 2, 1), (11, 6, 2)];
        let config = config(14, None, vec![0, 1], &ues);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(2, 14, 25);
        let gains = [Complex32::new(0.7, 0.7), Complex32::new(-1.0, 0.0)];
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(6, 0), &[1, 1], &gains);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(3, 1), &[], &gains);

        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        let requested: Vec<_> = config.ue_parameters.keys().copied().collect();
        let returned: Vec<_> = results.keys().copied().collect();
        assert_eq!(requested, returned);

        assert!(results[&Format1MultiplexKey::new(6, 0)].uci_message.is_valid());
        assert_eq!(results[&Format1MultiplexKey::new(6, 0)].uci_message.harq_ack_bits(), &[1, 1]);
        let sr = &results[&Format1MultiplexKey::new(3, 1)].uci_message;
        assert!(sr.is_valid());
        assert_eq!(sr.sr_bits(), &[1]);

        for absent in [Format1MultiplexKey::new(0, 0), Format1MultiplexKey::new(9, 2), Format1MultiplexKey::new(11, 6)] {
            assert_eq!(results[&absent].uci_message.status(), UciStatus::Invalid, "{:?}", absent);
        }
    }

    #[test]
    fn test_hopping_with_noise() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut config = config(14, Some(15), vec![0, 1], &[(2, 1, 2), (8, 2, 1)]);
        config.group_hopping = GroupHopping::Enable;
        config.n_id = 725;

        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(2, 14, 25);
        let gains = [Complex32::new(0.6, -0.8), Complex32::new(0.3, 0.9)];
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(2, 1), &[0, 1], &gains);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(8, 2), &[1], &gains);
        // 10 dB SNR
        add_noise(&mut grid, 0.1, &mut rng);

        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        let first = &results[&Format1MultiplexKey::new(2, 1)];
        assert!(first.uci_message.is_valid());
        assert_eq!(first.uci_message.harq_ack_bits(), &[0, 1]);
        let second = &results[&Format1MultiplexKey::new(8, 2)];
        assert!(second.uci_message.is_valid());
        assert_eq!(second.uci_message.harq_ack_bits(), &[1]);

        let sinr_db = first.csi.sinr_ch_estimator_db().unwrap();
        assert!(sinr_db > 5.0 && sinr_db < 15.0, "SINR {} dB", sinr_db);
    }

    #[test]
    fn test_unlisted_shift_is_not_noise() {
        let config = config(14, None, vec![0], &[(0, 0, 2)]);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(1, 14, 25);
        let gain = [Complex32::new(1.0, 0.0)];
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(0, 0), &[1, 0], &gain);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(3, 0), &[0, 1], &gain);

        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        assert_eq!(results.len(), 1);
        let result = &results[&Format1MultiplexKey::new(0, 0)];
        assert_eq!(result.uci_message.status(), UciStatus::Valid);
        assert_eq!(result.uci_message.harq_ack_bits(), &[1, 0]);
        let sinr_db = result.csi.sinr_ch_estimator_db().unwrap();
        assert!(sinr_db > 30.0, "SINR {} dB", sinr_db);
    }

    #[test]
    fn test_detection_does_not_depend_on_requested_keys() {
        let both = config(14, None, vec![0], &[(0, 0, 2), (3, 0, 2)]);
        let single = config(14, None, vec![0], &[(0, 0, 2)]);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(1, 14, 25);
        modulator.modulate_format1(&mut grid, &both, Format1MultiplexKey::new(0, 0), &[1, 0], &[Complex32::new(0.3, 0.0)]);
        modulator.modulate_format1(&mut grid, &both, Format1MultiplexKey::new(3, 0), &[1, 1], &[Complex32::new(3.0, 0.0)]);

        let mut detector = Format1Detector::default();
        let key = Format1MultiplexKey::new(0, 0);
        let listed = detector.detect(&grid, &both).remove(&key).unwrap();
        let unlisted = detector.detect(&grid, &single).remove(&key).unwrap();

        for result in [&listed, &unlisted] {
            assert_eq!(result.uci_message.status(), UciStatus::Valid);
            assert_eq!(result.uci_message.harq_ack_bits(), &[1, 0]);
        }
        let listed_metric = listed.detection_metric.unwrap();
        let unlisted_metric = unlisted.detection_metric.unwrap();
        assert!(
            (listed_metric - unlisted_metric).abs() <= 1e-3 * listed_metric.abs(),
            "metric {} with the interferer listed, {} without",
            listed_metric,
            unlisted_metric
        );
    }

    #[test]
    fn test_sr_only_with_bit_one_is_invalid() {
        let config = config(14, None, vec![0], &[(0, 0, 0)]);
        let mut modulator = PucchModulator::new().unwrap();
        let mut grid = ResourceGrid::new(1, 14, 25);
        modulator.modulate_format1(&mut grid, &config, Format1MultiplexKey::new(0, 0), &[1], &[Complex32::new(1.0, 0.0)]);

        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        let result = &results[&Format1MultiplexKey::new(0, 0)];
        assert!(result.detection_metric.unwrap() > detection_threshold(1));
        assert_eq!(result.uci_message.status(), UciStatus::Invalid);
        assert_eq!(result.uci_message.sr_bits(), &[0]);
    }

    #[test]
    fn test_empty_grid_is_invalid() {
        let config = config(4, None, vec![0], &[(0, 0, 0), (4, 1, 1)]);
        let grid = ResourceGrid::new(1, 14, 25);
        let mut detector = Format1Detector::default();
        let results = detector.detect(&grid, &config);
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.uci_message.status() == UciStatus::Invalid));
    }

    #[test]
    fn test_hop_layout() {
        let hopping = config(5, Some(10), vec![0], &[(0, 0, 0)]).allocation;
        assert_eq!(hop_layout(&hopping, 0), (1, 1));
        assert_eq!(hop_layout(&hopping, 1), (2, 1));

        let six = config(6, Some(10), vec![0], &[(0, 0, 0)]).allocation;
        assert_eq!(hop_layout(&six, 0), (2, 1));
        assert_eq!(hop_layout(&six, 1), (1, 2));

        let single = config(14, None, vec![0], &[(0, 0, 0)]).allocation;
        assert_eq!(hop_layout(&single, 0), (7, 7));
    }

    #[test]
    fn test_occ_orthogonality() {
        for sf in 1..=MAX_SPREADING_FACTOR {
            for a in 0..sf {
                for b in 0..sf {
                    let dot: Complex32 = (0..sf)
                        .map(|m| occ_coefficient(sf, a, m) * occ_coefficient(sf, b, m).conj())
                        .sum();
                    let expected = if a == b { sf as f32 } else { 0.0 };
                    assert!((dot.norm() - expected).abs() < 1e-4, "sf {} codes {} {}", sf, a, b);
                }
            }
        }
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(detection_threshold(1), 0.90);
        assert_eq!(detection_threshold(8), 6.95);
        assert!((detection_threshold(3) - 3.725).abs() < 1e-5);
        for dof in 1..8 {
            assert!(detection_threshold(dof + 1) >= detection_threshold(dof));
        }
    }

    #[test]
    #[should_panic]
    fn test_occ_index_out_of_range() {
        occ_coefficient(3, 3, 0);
    }
}
