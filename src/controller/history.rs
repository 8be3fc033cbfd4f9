use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One control-step sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub target: f64,
}

/// Bounded in-memory log; the oldest sample is evicted first once full.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: HistorySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistorySample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<HistorySample> {
        self.samples.iter().cloned().collect()
    }
}
