//! PUCCH processor pool
//!
//! A fixed set of processors shared by concurrent callers. Each processor is
//! lent to at most one caller at a time and comes back when the lease is
//! dropped. Availability is tracked in a 64-bit bitmap claimed with
//! compare-and-swap, so a caller never waits for a busy processor: when every
//! processor is leased the call returns a default result and logs an error.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, trace};

use super::config::{
    Format0Configuration, Format1Configuration, Format2Configuration, Format3Configuration, Format4Configuration,
};
use super::csi::ChannelStateInformation;
use super::format1::Format1BatchResult;
use super::processor::{PucchProcessing, PucchProcessor};
use super::uci::PucchUciMessage;
use super::{PucchDemodulationResult, PucchDetectionResult};
use crate::phy::resource_grid::ResourceGridReader;
use crate::LayerError;

/// Largest number of processors a pool can hold
pub const MAX_POOL_SIZE: usize = 64;

/// Pool of PUCCH processors
pub struct PucchProcessorPool<P = PucchProcessor> {
    processors: Vec<Mutex<P>>,
    /// Bit i set while processor i is free
    available: AtomicU64,
}

/// Exclusive use of one pooled processor, returned on drop
pub struct ProcessorLease<'a, P> {
    pool: &'a PucchProcessorPool<P>,
    index: usize,
    guard: Option<MutexGuard<'a, P>>,
}

impl<P: PucchProcessing> PucchProcessorPool<P> {
    /// Create a pool from fully built processors
    pub fn new(processors: Vec<P>) -> Result<Self, LayerError> {
        let count = processors.len();
        if count == 0 || count > MAX_POOL_SIZE {
            return Err(LayerError::InvalidConfiguration(format!(
                "PUCCH processor pool size {} outside 1..={}",
                count, MAX_POOL_SIZE
            )));
        }

        let available = if count == MAX_POOL_SIZE {
            u64::MAX
        } else {
            (1u64 << count) - 1
        };

        Ok(Self {
            processors: processors.into_iter().map(Mutex::new).collect(),
            available: AtomicU64::new(available),
        })
    }

    /// Number of processors in the pool
    pub fn capacity(&self) -> usize {
        self.processors.len()
    }

    /// Number of processors not currently leased
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed).count_ones() as usize
    }

    /// Borrow a free processor without waiting
    pub fn lease(&self) -> Result<ProcessorLease<'_, P>, LayerError> {
        loop {
            let available = self.available.load(Ordering::Acquire);
            if available == 0 {
                return Err(LayerError::ResourceUnavailable(format!(
                    "all {} PUCCH processors are busy",
                    self.capacity()
                )));
            }

            let index = available.trailing_zeros() as usize;
            let mask = 1u64 << index;
            if self
                .available
                .compare_exchange_weak(available, available & !mask, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // A processor that panicked mid-call is still structurally sound
                let guard = self.processors[index].lock().unwrap_or_else(PoisonError::into_inner);
                trace!("Leased PUCCH processor {}", index);
                return Ok(ProcessorLease {
                    pool: self,
                    index,
                    guard: Some(guard),
                });
            }
        }
    }

    pub fn process_format0(&self, grid: &dyn ResourceGridReader, config: &Format0Configuration) -> PucchDetectionResult {
        match self.lease() {
            Ok(mut processor) => processor.process_format0(grid, config),
            Err(e) => {
                error!("PUCCH Format 0 not processed: {}", e);
                PucchDetectionResult {
                    uci_message: PucchUciMessage::new(usize::from(config.sr_opportunity), config.nof_harq_ack, 0, 0),
                    ..Default::default()
                }
            }
        }
    }

    pub fn process_format1(&self, grid: &dyn ResourceGridReader, config: &Format1Configuration) -> Format1BatchResult {
        match self.lease() {
            Ok(mut processor) => processor.process_format1(grid, config),
            Err(e) => {
                error!("PUCCH Format 1 not processed: {}", e);
                config
                    .ue_parameters
                    .iter()
                    .map(|(key, parameters)| {
                        let (nof_sr, nof_harq_ack) = if parameters.nof_harq_ack == 0 {
                            (1, 0)
                        } else {
                            (0, parameters.nof_harq_ack)
                        };
                        let result = PucchDetectionResult {
                            uci_message: PucchUciMessage::new(nof_sr, nof_harq_ack, 0, 0),
                            ..Default::default()
                        };
                        (*key, result)
                    })
                    .collect()
            }
        }
    }

    pub fn process_format2(&self, grid: &dyn ResourceGridReader, config: &Format2Configuration) -> PucchDemodulationResult {
        match self.lease() {
            Ok(mut processor) => processor.process_format2(grid, config),
            Err(e) => {
                error!("PUCCH Format 2 not processed: {}", e);
                erased_result(config.nof_coded_bits())
            }
        }
    }

    pub fn process_format3(&self, grid: &dyn ResourceGridReader, config: &Format3Configuration) -> PucchDemodulationResult {
        match self.lease() {
            Ok(mut processor) => processor.process_format3(grid, config),
            Err(e) => {
                error!("PUCCH Format 3 not processed: {}", e);
                erased_result(config.nof_coded_bits())
            }
        }
    }

    pub fn process_format4(&self, grid: &dyn ResourceGridReader, config: &Format4Configuration) -> PucchDemodulationResult {
        match self.lease() {
            Ok(mut processor) => processor.process_format4(grid, config),
            Err(e) => {
                error!("PUCCH Format 4 not processed: {}", e);
                erased_result(config.nof_coded_bits())
            }
        }
    }
}

/// Zero LLRs mark every coded bit as erased
fn erased_result(nof_bits: usize) -> PucchDemodulationResult {
    PucchDemodulationResult {
        llrs: vec![0.0; nof_bits],
        csi: ChannelStateInformation::default(),
    }
}

impl<P> Deref for ProcessorLease<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("lease guard is only released on drop"),
        }
    }
}

impl<P> DerefMut for ProcessorLease<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        match &mut self.guard {
            Some(guard) => &mut **guard,
            None => unreachable!("lease guard is only released on drop"),
        }
    }
}

impl<P> Drop for ProcessorLease<'_, P> {
    fn drop(&mut self) {
        // Unlock before advertising the processor as free
        drop(self.guard.take());
        self.pool.available.fetch_or(1u64 << self.index, Ordering::Release);
        trace!("Returned PUCCH processor {}", self.index);
    }
}

impl<P> std::fmt::Debug for PucchProcessorPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PucchProcessorPool")
            .field("capacity", &self.processors.len())
            .field("available", &self.available.load(Ordering::Relaxed).count_ones())
            .finish()
    }
}
