//! Channel equalizer
//!
//! Combines the observations of several receive ports into per resource
//! element estimates of one or two transmitted layers. Zero-Forcing and MMSE
//! are supported; the algorithm is chosen when the equalizer is built.
//!
//! Resource elements that cannot be equalized (invalid noise variance,
//! non-finite or null channel) produce a zero symbol with infinite noise
//! variance, which downstream demodulation maps to a zero LLR.

use common::types::MAX_PORTS;
use ndarray::{ArrayView2, ArrayView3, ArrayViewMut2};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Maximum number of transmit layers the equalizer handles
pub const MAX_TX_LAYERS: usize = 2;

/// Equalization algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EqualizerAlgorithm {
    /// Zero-Forcing
    ZeroForcing,
    /// Minimum Mean Square Error
    #[default]
    Mmse,
}

/// Channel equalizer
#[derive(Debug, Clone, Copy)]
pub struct ChannelEqualizer {
    algorithm: EqualizerAlgorithm,
}

impl ChannelEqualizer {
    pub fn new(algorithm: EqualizerAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> EqualizerAlgorithm {
        self.algorithm
    }

    /// Equalize a set of resource elements
    ///
    /// * `symbols` - equalized symbols `[re, layer]`
    /// * `noise_vars` - post-equalization noise variances `[re, layer]`
    /// * `received` - received resource elements `[re, rx port]`
    /// * `channel` - channel coefficients `[re, rx port, layer]`
    /// * `port_noise_vars` - noise variance of each receive port
    /// * `scaling` - gain applied to the equalized symbols
    pub fn equalize(
        &self,
        mut symbols: ArrayViewMut2<'_, Complex32>,
        mut noise_vars: ArrayViewMut2<'_, f32>,
        received: ArrayView2<'_, Complex32>,
        channel: ArrayView3<'_, Complex32>,
        port_noise_vars: &[f32],
        scaling: f32,
    ) {
        let (nof_re, nof_ports) = received.dim();
        let (ch_nof_re, ch_nof_ports, nof_layers) = channel.dim();

        assert!(
            (1..=MAX_PORTS).contains(&nof_ports),
            "Invalid number of receive ports {}",
            nof_ports
        );
        assert!(
            (1..=MAX_TX_LAYERS).contains(&nof_layers),
            "Invalid number of transmit layers {}",
            nof_layers
        );
        assert_eq!(ch_nof_re, nof_re, "Channel estimate and received RE counts differ");
        assert_eq!(ch_nof_ports, nof_ports, "Channel estimate and received port counts differ");
        assert_eq!(port_noise_vars.len(), nof_ports, "One noise variance per port is required");
        assert_eq!(symbols.dim(), (nof_re, nof_layers), "Invalid equalized symbol buffer shape");
        assert_eq!(noise_vars.dim(), (nof_re, nof_layers), "Invalid noise variance buffer shape");

        // A single unusable port noise variance invalidates the whole allocation
        if port_noise_vars.iter().any(|&nvar| !is_valid_variance(nvar)) {
            symbols.fill(Complex32::new(0.0, 0.0));
            noise_vars.fill(f32::INFINITY);
            return;
        }

        let mut inv_noise = [0.0f32; MAX_PORTS];
        for (inv, &nvar) in inv_noise.iter_mut().zip(port_noise_vars.iter()) {
            *inv = 1.0 / nvar;
        }
        let inv_noise = &inv_noise[..nof_ports];
        let scaling_sq = scaling * scaling;

        for re in 0..nof_re {
            let y = received.row(re);
            let h = channel.index_axis(ndarray::Axis(0), re);

            let mut x = [Complex32::new(0.0, 0.0); MAX_TX_LAYERS];
            let mut nvar = [f32::INFINITY; MAX_TX_LAYERS];
            let ok = if nof_layers == 1 {
                self.equalize_one_layer(&mut x[0], &mut nvar[0], y, h.column(0), inv_noise)
            } else {
                self.equalize_two_layers(&mut x, &mut nvar, y, h, inv_noise)
            };

            for layer in 0..nof_layers {
                if ok {
                    symbols[[re, layer]] = x[layer] * scaling;
                    noise_vars[[re, layer]] = nvar[layer] * scaling_sq;
                } else {
                    symbols[[re, layer]] = Complex32::new(0.0, 0.0);
                    noise_vars[[re, layer]] = f32::INFINITY;
                }
            }
        }
    }

    fn equalize_one_layer(
        &self,
        x: &mut Complex32,
        nvar: &mut f32,
        y: ndarray::ArrayView1<'_, Complex32>,
        h: ndarray::ArrayView1<'_, Complex32>,
        inv_noise: &[f32],
    ) -> bool {
        let mut matched = Complex32::new(0.0, 0.0);
        let mut rho = 0.0f32;
        for ((&h_p, &y_p), &inv) in h.iter().zip(y.iter()).zip(inv_noise.iter()) {
            if !is_finite(h_p) {
                return false;
            }
            matched += h_p.conj() * y_p * inv;
            rho += h_p.norm_sqr() * inv;
        }

        if !rho.is_finite() || rho <= 0.0 {
            return false;
        }

        let denominator = match self.algorithm {
            EqualizerAlgorithm::ZeroForcing => rho,
            EqualizerAlgorithm::Mmse => rho + 1.0,
        };
        *x = matched / denominator;
        *nvar = 1.0 / denominator;
        is_finite(*x)
    }

    fn equalize_two_layers(
        &self,
        x: &mut [Complex32; MAX_TX_LAYERS],
        nvar: &mut [f32; MAX_TX_LAYERS],
        y: ndarray::ArrayView1<'_, Complex32>,
        h: ArrayView2<'_, Complex32>,
        inv_noise: &[f32],
    ) -> bool {
        // Gram matrix G = H^H N^-1 H and matched filter output b = H^H N^-1 y
        let mut g00 = 0.0f32;
        let mut g11 = 0.0f32;
        let mut g01 = Complex32::new(0.0, 0.0);
        let mut b = [Complex32::new(0.0, 0.0); MAX_TX_LAYERS];
        for (port, (&y_p, &inv)) in y.iter().zip(inv_noise.iter()).enumerate() {
            let h0 = h[[port, 0]];
            let h1 = h[[port, 1]];
            if !is_finite(h0) || !is_finite(h1) {
                return false;
            }
            g00 += h0.norm_sqr() * inv;
            g11 += h1.norm_sqr() * inv;
            g01 += h0.conj() * h1 * inv;
            b[0] += h0.conj() * y_p * inv;
            b[1] += h1.conj() * y_p * inv;
        }

        if g00 <= 0.0 || g11 <= 0.0 {
            return false;
        }

        let regularization = match self.algorithm {
            EqualizerAlgorithm::ZeroForcing => 0.0,
            EqualizerAlgorithm::Mmse => 1.0,
        };
        let a00 = g00 + regularization;
        let a11 = g11 + regularization;
        let det = a00 * a11 - g01.norm_sqr();
        if !det.is_finite() || det <= f32::EPSILON * a00 * a11 {
            return false;
        }

        // Inverse of the Hermitian 2x2 matrix [a00 g01; conj(g01) a11]
        let inv_det = 1.0 / det;
        x[0] = (b[0] * a11 - g01 * b[1]) * inv_det;
        x[1] = (b[1] * a00 - g01.conj() * b[0]) * inv_det;
        nvar[0] = a11 * inv_det;
        nvar[1] = a00 * inv_det;

        x.iter().all(|v| is_finite(*v)) && nvar.iter().all(|v| v.is_finite())
    }
}

fn is_valid_variance(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

fn is_finite(value: Complex32) -> bool {
    value.re.is_finite() && value.im.is_finite()
}
