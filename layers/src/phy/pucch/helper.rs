//! PUCCH sequence helper
//!
//! Group and sequence hopping (TS 38.211 Section 6.3.2.2.1) and cyclic shift
//! hopping (TS 38.211 Section 6.3.2.2.2) shared by the Format 0 and 1
//! detectors and the PUCCH modulator.

use common::types::{CyclicPrefix, SlotPoint, NRE};

use super::config::GroupHopping;
use crate::phy::sequences::{GoldSequenceGenerator, PseudoRandomGenerator, NOF_GROUPS};

/// Sequence group and base sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGroup {
    /// Group number u
    pub u: u32,
    /// Base sequence number v
    pub v: u32,
}

/// Computes sequence groups and cyclic shifts for PUCCH
#[derive(Debug, Clone)]
pub struct PucchHelper {
    prg: GoldSequenceGenerator,
}

impl PucchHelper {
    pub fn new() -> Self {
        Self {
            prg: GoldSequenceGenerator::new(0),
        }
    }

    /// Sequence group and number for a slot and hop
    pub fn sequence_group(&mut self, hopping: GroupHopping, slot: &SlotPoint, n_hop: u32, n_id: u32) -> SequenceGroup {
        let n_s = slot.slot_index();
        let groups = NOF_GROUPS as u32;

        match hopping {
            GroupHopping::Neither => SequenceGroup { u: n_id % groups, v: 0 },
            GroupHopping::Enable => {
                self.prg.init(n_id / groups);
                self.prg.advance(8 * (2 * n_s + n_hop) as usize);
                let f_gh = (0..8).fold(0u32, |acc, m| acc + ((self.prg.next_bit() as u32) << m)) % groups;
                let f_ss = n_id % groups;
                SequenceGroup {
                    u: (f_gh + f_ss) % groups,
                    v: 0,
                }
            }
            GroupHopping::Disable => {
                self.prg.init((1 << 5) * (n_id / groups) + (n_id % groups));
                self.prg.advance((2 * n_s + n_hop) as usize);
                SequenceGroup {
                    u: n_id % groups,
                    v: self.prg.next_bit() as u32,
                }
            }
        }
    }

    /// Cyclic shift hopping term n_cs(n_s, l) for slot symbol `symbol`
    pub fn cyclic_shift_hopping(&mut self, slot: &SlotPoint, cp: CyclicPrefix, symbol: usize, n_id: u32) -> u32 {
        let n_s = slot.slot_index() as usize;
        let nof_symbols = cp.nof_symbols_per_slot();

        self.prg.init(n_id);
        self.prg.advance(8 * (nof_symbols * n_s + symbol));
        (0..8).fold(0u32, |acc, m| acc + ((self.prg.next_bit() as u32) << m))
    }

    /// Cyclic shift index (alpha in units of 2π/12) for slot symbol `symbol`
    pub fn alpha_index(
        &mut self,
        slot: &SlotPoint,
        cp: CyclicPrefix,
        n_id: u32,
        symbol: usize,
        initial_cyclic_shift: u32,
        m_cs: u32,
    ) -> u32 {
        let n_cs = self.cyclic_shift_hopping(slot, cp, symbol, n_id);
        (initial_cyclic_shift + m_cs + n_cs) % NRE as u32
    }
}

impl Default for PucchHelper {
    fn default() -> Self {
        Self::new()
    }
}
