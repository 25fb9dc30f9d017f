//! ==============================================================================
//! timeline.rs - merged reading timeline
//! ==============================================================================
//!
//! purpose:
//!     one ordered sequence of readings built from two inputs:
//!     - a history batch, prepended in full whenever a new batch arrives
//!     - single live readings, appended as they arrive
//!
//! ordering:
//!     nothing is re-sorted and nothing is deduplicated. the history batch is
//!     trusted to be chronological and to precede every live arrival; a
//!     re-fetched batch is prepended again and duplicates its entries.
//!     violations of that assumption are counted and logged, not repaired.
//!
//! relationships:
//!     - owned by: overview.rs (the only writer)
//!     - fed by: history.rs (batches) and stream.rs (live readings)
//!
//! ==============================================================================

use crate::domain::Reading;
use chrono::{DateTime, Utc};

#[derive(Debug, Default, Clone)]
pub struct Timeline {
    readings: Vec<Reading>,
    ordering_violations: usize,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// `batch ++ self`
    pub fn prepend_batch(&mut self, batch: &[Reading]) {
        if batch.is_empty() {
            return;
        }

        self.ordering_violations += count_backsteps(batch);
        if let (Some(last), Some(first)) = (batch.last(), self.readings.first()) {
            if last.time > first.time {
                let (earlier, later) = (last.time, first.time);
                self.note_violation(earlier, later);
            }
        }

        self.readings.splice(0..0, batch.iter().cloned());
    }

    /// `self ++ [reading]`
    pub fn append(&mut self, reading: Reading) {
        if let Some(last) = self.readings.last() {
            if reading.time < last.time {
                let earlier = last.time;
                self.note_violation(earlier, reading.time);
            }
        }
        self.readings.push(reading);
    }

    /// the reading handed to the overview display
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.last()
    }

    pub fn as_slice(&self) -> &[Reading] {
        &self.readings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// adjacent pairs observed out of chronological order so far
    pub fn ordering_violations(&self) -> usize {
        self.ordering_violations
    }

    fn note_violation(&mut self, earlier: DateTime<Utc>, later: DateTime<Utc>) {
        self.ordering_violations += 1;
        log::debug!("[TIMELINE] out of order: {} placed before {}", earlier, later);
    }
}

fn count_backsteps(batch: &[Reading]) -> usize {
    batch.windows(2).filter(|w| w[1].time < w[0].time).count()
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
