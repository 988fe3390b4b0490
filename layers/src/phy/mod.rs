//! Physical Layer (PHY) Submodules
//!
//! This module contains the uplink control channel receiver of the 5G NR
//! physical layer according to 3GPP TS 38.211 and TS 38.213.

pub mod channel_estimate;
pub mod demodulation;
pub mod dft;
pub mod equalizer;
pub mod pucch;
pub mod resource_grid;
pub mod sequences;
pub mod transform_precoder;

// Re-export commonly used types
pub use channel_estimate::{ChannelEstimate, ChannelEstimateDimensions};
pub use demodulation::{demodulate_soft, hard_decision, Modulation};
pub use dft::{DftDirection, DftProcessor};
pub use equalizer::{ChannelEqualizer, EqualizerAlgorithm};
pub use resource_grid::{ResourceGrid, ResourceGridReader};
pub use sequences::{GoldSequenceGenerator, LowPaprSequenceCollection, PseudoRandomGenerator, ShortLowPaprCollection};
pub use transform_precoder::TransformPrecoder;
