use std::collections::VecDeque;

use thiserror::Error;

use crate::device::MetricSample;

/// Observed default window: one minute of history at a five second cadence.
pub const DEFAULT_CAPACITY: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("history capacity must be at least 1")]
pub struct ZeroCapacity;

/// Fixed-capacity recency window of samples, oldest first.
///
/// Pushing past capacity evicts the oldest sample. There is no aggregation or
/// interior mutation: the buffer holds exactly the last `capacity` samples in
/// the order they were pushed. It has a single writer (the device's poller);
/// readers get copies through [`TimeSeriesBuffer::snapshot`].
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Result<Self, ZeroCapacity> {
        if capacity == 0 {
            return Err(ZeroCapacity);
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.samples.iter().cloned().collect()
    }

}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
        }
    }
}
