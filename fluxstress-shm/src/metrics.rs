//! Per-worker metric slots.

use crate::ShmError;
use crate::heap::HeapStr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Metric slots available to each worker
pub const MAX_METRICS: usize = 40;

/// One (description, value) sample. Written only by the owning worker.
#[repr(C)]
#[derive(Debug, Default)]
pub struct MetricSlot {
    desc_offset: AtomicU32,
    desc_len: AtomicU32,
    value_bits: AtomicU64,
    kind: AtomicU8,
    valid: AtomicBool,
}

/// Raw sample read back from a slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawMetric {
    /// Slot index
    pub index: usize,
    /// Description in the shared heap
    pub description: HeapStr,
    /// Sample value
    pub value: f64,
    /// Combination kind code, interpreted by the aggregator
    pub kind: u8,
}

/// Metric slots of one worker
#[repr(C)]
#[derive(Debug)]
pub struct MetricBlock {
    slots: [MetricSlot; MAX_METRICS],
}

impl Default for MetricBlock {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| MetricSlot::default()),
        }
    }
}

impl MetricBlock {
    /// Write slot `index`. Re-recording a slot overwrites it.
    pub fn record(&self, index: usize, description: HeapStr, value: f64, kind: u8) -> Result<(), ShmError> {
        let slot = self.slots.get(index).ok_or(ShmError::MetricIndex {
            index,
            max: MAX_METRICS,
        })?;
        slot.valid.store(false, Ordering::Relaxed);
        slot.desc_offset.store(description.offset, Ordering::Relaxed);
        slot.desc_len.store(description.len, Ordering::Relaxed);
        slot.value_bits.store(value.to_bits(), Ordering::Relaxed);
        slot.kind.store(kind, Ordering::Relaxed);
        slot.valid.store(true, Ordering::Release);
        Ok(())
    }

    /// Description handle already stored in `index`, if any.
    pub fn description(&self, index: usize) -> Option<HeapStr> {
        let slot = self.slots.get(index)?;
        slot.valid.load(Ordering::Acquire).then(|| HeapStr {
            offset: slot.desc_offset.load(Ordering::Relaxed),
            len: slot.desc_len.load(Ordering::Relaxed),
        })
    }

    /// All valid samples in slot order
    pub fn samples(&self) -> Vec<RawMetric> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.valid.load(Ordering::Acquire))
            .map(|(index, slot)| RawMetric {
                index,
                description: HeapStr {
                    offset: slot.desc_offset.load(Ordering::Relaxed),
                    len: slot.desc_len.load(Ordering::Relaxed),
                },
                value: f64::from_bits(slot.value_bits.load(Ordering::Relaxed)),
                kind: slot.kind.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_back() {
        let block = MetricBlock::default();
        let desc = HeapStr { offset: 4, len: 10 };
        block.record(2, desc, 12.5, 0).unwrap();
        block.record(0, desc, 1.0, 3).unwrap();

        let samples = block.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].index, 0);
        assert_eq!(samples[0].kind, 3);
        assert_eq!(samples[1].value, 12.5);
        assert_eq!(block.description(2), Some(desc));
        assert_eq!(block.description(1), None);
    }

    #[test]
    fn test_index_out_of_range() {
        let block = MetricBlock::default();
        let err = block
            .record(MAX_METRICS, HeapStr { offset: 0, len: 0 }, 1.0, 0)
            .unwrap_err();
        assert!(matches!(err, ShmError::MetricIndex { index: 40, max: 40 }));
    }
}
