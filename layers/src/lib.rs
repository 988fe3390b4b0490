//! Uplink Protocol Stack Layers Library
//!
//! This crate implements the 5G NR uplink physical layer receiver for the
//! Physical Uplink Control Channel according to 3GPP TS 38.211 and 38.213.

pub mod phy;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
