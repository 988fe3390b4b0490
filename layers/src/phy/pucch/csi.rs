//! Channel state information reported with PUCCH results

use common::utils::{convert_amplitude_to_db, convert_power_to_db};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_1_SQRT_2;

use crate::phy::demodulation::Modulation;

/// SINR computation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SinrType {
    /// From the channel estimator measurements
    #[default]
    ChannelEstimator,
    /// From the post-equalization noise variances
    PostEqualization,
    /// From the error vector magnitude of the equalized symbols
    Evm,
}

/// Channel state information
///
/// Powers are stored in linear units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelStateInformation {
    sinr_report_type: SinrType,
    sinr_ch_estimator: Option<f32>,
    sinr_post_eq: Option<f32>,
    evm: Option<f32>,
    rsrp: Option<f32>,
    epre: Option<f32>,
    time_alignment: Option<f32>,
}

impl ChannelStateInformation {
    pub fn new(sinr_report_type: SinrType) -> Self {
        Self {
            sinr_report_type,
            ..Default::default()
        }
    }

    pub fn sinr_report_type(&self) -> SinrType {
        self.sinr_report_type
    }

    pub fn set_sinr_ch_estimator(&mut self, sinr: f32) {
        self.sinr_ch_estimator = Some(sinr);
    }

    pub fn set_sinr_post_eq(&mut self, sinr: f32) {
        self.sinr_post_eq = Some(sinr);
    }

    pub fn set_evm(&mut self, evm: f32) {
        self.evm = Some(evm);
    }

    pub fn set_rsrp(&mut self, rsrp: f32) {
        self.rsrp = Some(rsrp);
    }

    pub fn set_epre(&mut self, epre: f32) {
        self.epre = Some(epre);
    }

    pub fn set_time_alignment(&mut self, seconds: f32) {
        self.time_alignment = Some(seconds);
    }

    /// SINR in dB according to the selected report type
    pub fn sinr_db(&self) -> Option<f32> {
        match self.sinr_report_type {
            SinrType::ChannelEstimator => self.sinr_ch_estimator.map(convert_power_to_db),
            SinrType::PostEqualization => self.sinr_post_eq.map(convert_power_to_db),
            // SINR = 1 / EVM^2
            SinrType::Evm => self.evm.map(|evm| -convert_amplitude_to_db(evm)),
        }
    }

    pub fn sinr_ch_estimator_db(&self) -> Option<f32> {
        self.sinr_ch_estimator.map(convert_power_to_db)
    }

    pub fn sinr_post_eq_db(&self) -> Option<f32> {
        self.sinr_post_eq.map(convert_power_to_db)
    }

    pub fn evm(&self) -> Option<f32> {
        self.evm
    }

    pub fn rsrp(&self) -> Option<f32> {
        self.rsrp
    }

    pub fn rsrp_db(&self) -> Option<f32> {
        self.rsrp.map(convert_power_to_db)
    }

    pub fn epre(&self) -> Option<f32> {
        self.epre
    }

    pub fn epre_db(&self) -> Option<f32> {
        self.epre.map(convert_power_to_db)
    }

    pub fn time_alignment(&self) -> Option<f32> {
        self.time_alignment
    }
}

/// Post-equalization SINR from per resource element noise variances
///
/// Discarded resource elements are ignored. Returns `None` if none remain.
pub fn post_equalization_sinr(noise_vars: &[f32]) -> Option<f32> {
    let (sum, count) = noise_vars
        .iter()
        .filter(|v| v.is_finite() && **v > 0.0)
        .fold((0.0f32, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| count as f32 / sum)
}

/// Error vector magnitude of equalized symbols against their hard decisions
pub fn error_vector_magnitude(symbols: &[Complex32], noise_vars: &[f32], modulation: Modulation) -> Option<f32> {
    let mut error = 0.0f32;
    let mut count = 0usize;
    for (i, (&symbol, &nvar)) in symbols.iter().zip(noise_vars.iter()).enumerate() {
        if !(nvar.is_finite() && nvar > 0.0) {
            continue;
        }
        let decided = match modulation {
            Modulation::Qpsk => Complex32::new(
                FRAC_1_SQRT_2.copysign(symbol.re),
                FRAC_1_SQRT_2.copysign(symbol.im),
            ),
            Modulation::PiHalfBpsk => {
                let reference = if i % 2 == 0 {
                    Complex32::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2)
                } else {
                    Complex32::new(-FRAC_1_SQRT_2, FRAC_1_SQRT_2)
                };
                if (reference.conj() * symbol).re >= 0.0 {
                    reference
                } else {
                    -reference
                }
            }
        };
        error += (symbol - decided).norm_sqr();
        count += 1;
    }
    (count > 0).then(|| (error / count as f32).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_type_selects_sinr() {
        let mut csi = ChannelStateInformation::new(SinrType::PostEqualization);
        assert_eq!(csi.sinr_db(), None);
        csi.set_sinr_ch_estimator(10.0);
        csi.set_sinr_post_eq(100.0);
        csi.set_evm(0.1);
        assert!((csi.sinr_db().unwrap() - 20.0).abs() < 1e-4);
        assert!((csi.sinr_ch_estimator_db().unwrap() - 10.0).abs() < 1e-4);

        let mut evm_csi = ChannelStateInformation::new(SinrType::Evm);
        evm_csi.set_evm(0.1);
        assert!((evm_csi.sinr_db().unwrap() - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_post_equalization_sinr_skips_discarded() {
        let sinr = post_equalization_sinr(&[0.1, f32::INFINITY, 0.1, 0.0]).unwrap();
        assert!((sinr - 10.0).abs() < 1e-4);
        assert_eq!(post_equalization_sinr(&[f32::INFINITY]), None);
    }

    #[test]
    fn test_evm_of_clean_symbols_is_zero() {
        let symbols = [
            Complex32::new(FRAC_1_SQRT_2, -FRAC_1_SQRT_2),
            Complex32::new(-FRAC_1_SQRT_2, -FRAC_1_SQRT_2),
        ];
        let evm = error_vector_magnitude(&symbols, &[1.0, 1.0], Modulation::Qpsk).unwrap();
        assert!(evm < 1e-6);

        let noisy = [Complex32::new(FRAC_1_SQRT_2 + 0.1, FRAC_1_SQRT_2)];
        let evm = error_vector_magnitude(&noisy, &[1.0], Modulation::Qpsk).unwrap();
        assert!((evm - 0.1).abs() < 1e-5);
    }
}
