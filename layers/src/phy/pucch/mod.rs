//! Physical Uplink Control Channel receiver
//!
//! Detection of Formats 0 and 1 and demodulation of Formats 2, 3 and 4
//! according to TS 38.211 Section 6.3.2 and TS 38.213 Section 9.2, plus the
//! processor that dispatches per format and the pool that shares processors
//! between threads.

pub mod config;
pub mod csi;
mod equalization;
pub mod format0;
pub mod format1;
pub mod format2;
pub mod format3;
pub mod format4;
pub mod helper;
pub mod modulator;
pub mod pool;
pub mod processor;
pub mod uci;
pub mod validator;

use serde::{Deserialize, Serialize};

pub use config::{
    Format0Configuration, Format1Configuration, Format1MultiplexKey, Format1UeParameters, Format2Configuration,
    Format3Configuration, Format4Configuration, GroupHopping, PucchAllocation, PucchFormat, UciPayloadSize,
};
pub use csi::{ChannelStateInformation, SinrType};
pub use format1::Format1BatchResult;
pub use modulator::PucchModulator;
pub use pool::{ProcessorLease, PucchProcessorPool};
pub use processor::{PucchDmrsEstimator, PucchEstimateRequest, PucchProcessing, PucchProcessor, PucchProcessorConfig};
pub use uci::{PucchUciMessage, UciStatus};
pub use validator::{PucchConfigError, PucchPduValidator};

/// Result of a Format 0 or Format 1 detection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PucchDetectionResult {
    pub uci_message: PucchUciMessage,
    /// Normalised detection statistic compared against the threshold
    pub detection_metric: Option<f32>,
    pub csi: ChannelStateInformation,
}

/// Result of a Format 2, 3 or 4 demodulation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PucchDemodulationResult {
    /// Descrambled soft bits, positive for 0
    pub llrs: Vec<f32>,
    pub csi: ChannelStateInformation,
}
