//! Bounded replay history
//!
//! Ring buffer of formatted records in publish order. Every record held
//! here consumed exactly one sequence id, so "the last N ids" and "the
//! last N records" are the same slice.

use std::collections::VecDeque;

use crate::message::FormattedMessage;

#[derive(Debug)]
pub struct History {
    records: VecDeque<FormattedMessage>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest while over capacity.
    pub fn push(&mut self, record: FormattedMessage) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The newest `min(count, len)` records, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &FormattedMessage> + '_ {
        let skip = self.records.len().saturating_sub(count);
        self.records.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.records.shrink_to_fit();
    }
}
