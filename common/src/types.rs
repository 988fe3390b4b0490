//! Common Types for the NR Uplink PHY
//!
//! Defines numerology and identifier types shared by the uplink receiver

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};

/// Number of subcarriers per resource block
pub const NRE: usize = 12;

/// Maximum number of resource blocks in a carrier
pub const MAX_RB: usize = 275;

/// Maximum number of OFDM symbols per slot (normal cyclic prefix)
pub const MAX_NSYMB_PER_SLOT: usize = 14;

/// Maximum number of receive ports handled by the uplink receiver
pub const MAX_PORTS: usize = 4;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index (mu)
    pub fn numerology(&self) -> u32 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots in a 1 ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots in a 10 ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 * self.slots_per_subframe()
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CyclicPrefix {
    /// Normal cyclic prefix
    #[default]
    Normal,
    /// Extended cyclic prefix (60 kHz only)
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols in one slot
    pub fn nof_symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }
}

/// Slot within the system frame timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPoint {
    /// Subcarrier spacing the slot numbering refers to
    pub scs: SubcarrierSpacing,
    /// System frame number (0-1023)
    pub sfn: u16,
    /// Slot index within the frame
    pub slot: u16,
}

impl SlotPoint {
    /// Maximum system frame number
    pub const MAX_SFN: u16 = 1023;

    /// Create a new slot point with validation
    pub fn new(scs: SubcarrierSpacing, sfn: u16, slot: u16) -> Option<Self> {
        if sfn <= Self::MAX_SFN && (slot as u32) < scs.slots_per_frame() {
            Some(Self { scs, sfn, slot })
        } else {
            None
        }
    }

    /// Slot index within the frame (n_s,f in TS 38.211)
    pub fn slot_index(&self) -> u32 {
        self.slot as u32
    }
}

impl Default for SlotPoint {
    fn default() -> Self {
        Self {
            scs: SubcarrierSpacing::Scs15,
            sfn: 0,
            slot: 0,
        }
    }
}
