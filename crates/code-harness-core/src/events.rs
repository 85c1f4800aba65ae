//! Bounded, append-only audit buffers.
//!
//! Both the index event log and the access log keep only the most recent
//! `capacity` entries. They are observability surfaces, not state.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::models::{AccessLogEntry, IndexEvent};

/// Fixed-capacity ring buffer; pushing into a full buffer evicts the oldest
/// entry.
#[derive(Debug)]
pub struct RingBuffer<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, entry: T) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<T> {
        self.entries.lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub type IndexEventLog = RingBuffer<IndexEvent>;
pub type AccessLog = RingBuffer<AccessLogEntry>;
