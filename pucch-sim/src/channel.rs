//! Flat fading channel with AWGN and its genie-aided estimator

use std::f32::consts::PI;

use common::utils::convert_db_to_power;
use layers::phy::pucch::{PucchDmrsEstimator, PucchEstimateRequest};
use layers::phy::{ChannelEstimate, ResourceGrid, ResourceGridReader};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Frequency flat channel, constant over the simulation
#[derive(Debug, Clone)]
pub struct FlatChannel {
    gains: Vec<Complex32>,
    noise_var: f32,
}

impl FlatChannel {
    /// Draw one unit power gain per receive port
    pub fn new(nof_ports: usize, snr_db: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let gains = (0..nof_ports)
            .map(|_| Complex32::from_polar(1.0, rng.gen_range(0.0..2.0 * PI)))
            .collect();
        Self {
            gains,
            noise_var: convert_db_to_power(-snr_db),
        }
    }

    pub fn gains(&self) -> &[Complex32] {
        &self.gains
    }

    pub fn noise_var(&self) -> f32 {
        self.noise_var
    }

    /// Add complex Gaussian noise to every resource element of the grid
    pub fn add_noise(&self, grid: &mut ResourceGrid, rng: &mut StdRng) {
        let sigma = (self.noise_var / 2.0).sqrt();
        for port in 0..grid.nof_ports() {
            for symbol in 0..grid.nof_symbols() {
                for subcarrier in 0..grid.nof_subc() {
                    // Box-Muller
                    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
                    let u2: f32 = rng.gen_range(0.0..1.0);
                    let noise = Complex32::from_polar((-2.0 * u1.ln()).sqrt() * sigma, 2.0 * PI * u2);
                    let value = grid.get_re(port, symbol, subcarrier);
                    grid.put_re(port, symbol, subcarrier, value + noise);
                }
            }
        }
    }

    /// Estimator reporting the true channel
    pub fn estimator(&self) -> KnownChannelEstimator {
        KnownChannelEstimator {
            gains: self.gains.clone(),
            noise_var: self.noise_var,
        }
    }
}

/// DM-RS estimator that knows the simulated channel
#[derive(Debug, Clone)]
pub struct KnownChannelEstimator {
    gains: Vec<Complex32>,
    noise_var: f32,
}

impl PucchDmrsEstimator for KnownChannelEstimator {
    fn estimate(&mut self, estimate: &mut ChannelEstimate, _grid: &dyn ResourceGridReader, request: PucchEstimateRequest<'_>) {
        let dims = request.dimensions();
        for (rx_port, &port) in request.ports().iter().enumerate() {
            let gain = self.gains.get(port).copied().unwrap_or_default();
            for symbol in 0..dims.nof_symbols {
                estimate.symbol_coefficients_mut(symbol, rx_port, 0).fill(gain);
            }
            estimate.set_noise_variance(self.noise_var, rx_port);
            estimate.set_rsrp(gain.norm_sqr(), rx_port);
            estimate.set_epre(gain.norm_sqr() + self.noise_var, rx_port);
            estimate.set_snr(gain.norm_sqr() / self.noise_var, rx_port);
        }
        estimate.set_time_alignment(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layers::phy::ChannelEstimateDimensions;
    use layers::phy::pucch::{Format4Configuration, GroupHopping, PucchAllocation, UciPayloadSize};
    use common::types::{CyclicPrefix, Rnti, SlotPoint};

    #[test]
    fn test_channel_is_reproducible() {
        let first = FlatChannel::new(2, 10.0, 3);
        let second = FlatChannel::new(2, 10.0, 3);
        assert_eq!(first.gains(), second.gains());
        assert!(first.gains().iter().all(|g| (g.norm() - 1.0).abs() < 1e-6));
        assert!((first.noise_var() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_noise_power() {
        let channel = FlatChannel::new(1, 0.0, 0);
        let mut grid = ResourceGrid::new(1, 14, 50);
        let mut rng = StdRng::seed_from_u64(11);
        channel.add_noise(&mut grid, &mut rng);

        let mut power = 0.0;
        for symbol in 0..14 {
            power += grid.get_view(0, symbol).iter().map(|v| v.norm_sqr()).sum::<f32>();
        }
        power /= (14 * grid.nof_subc()) as f32;
        assert!((power - 1.0).abs() < 0.1, "noise power {}", power);
    }

    #[test]
    fn test_estimator_follows_port_order() {
        let channel = FlatChannel::new(3, 20.0, 5);
        let config = Format4Configuration {
            allocation: PucchAllocation {
                slot: SlotPoint::default(),
                cp: CyclicPrefix::Normal,
                bwp_start_rb: 0,
                bwp_size_rb: 10,
                starting_prb: 0,
                second_hop_prb: None,
                start_symbol_index: 0,
                nof_symbols: 4,
            },
            rnti: Rnti(1),
            n_id: 0,
            n_id_hopping: 0,
            group_hopping: GroupHopping::Neither,
            pi2_bpsk: false,
            additional_dmrs: false,
            occ_length: 2,
            occ_index: 0,
            uci: UciPayloadSize::default(),
            ports: vec![2, 0],
        };
        let request = PucchEstimateRequest::Format4(&config);
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions::default());
        estimate.resize(request.dimensions());
        let grid = ResourceGrid::new(3, 14, 10);

        channel.estimator().estimate(&mut estimate, &grid, request);
        assert_eq!(estimate.get(5, 3, 0, 0), channel.gains()[2]);
        assert_eq!(estimate.get(0, 0, 1, 0), channel.gains()[0]);
        assert!((estimate.noise_variance(1) - 0.01).abs() < 1e-6);
    }
}
