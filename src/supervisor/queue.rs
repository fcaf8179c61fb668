//! Bounded FIFO of job ids waiting for a concurrency slot.

use std::collections::VecDeque;

use parking_lot::Mutex;

use docforge_common::{Error, JobId, Result};

#[derive(Debug)]
pub struct AdmissionQueue {
    pending: Mutex<VecDeque<JobId>>,
    /// 0 means unbounded.
    capacity: usize,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `id` to the tail.
    ///
    /// Returns `Ok(false)` when the id is already waiting and
    /// [`Error::AdmissionRejected`] when the queue is at capacity.
    pub fn push(&self, id: JobId) -> Result<bool> {
        let mut pending = self.pending.lock();
        if pending.contains(&id) {
            return Ok(false);
        }
        if self.capacity > 0 && pending.len() >= self.capacity {
            return Err(Error::AdmissionRejected {
                capacity: self.capacity,
            });
        }
        pending.push_back(id);
        Ok(true)
    }

    /// Remove `id` wherever it sits. Returns whether it was present.
    pub fn remove(&self, id: JobId) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|queued| *queued == id) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// 0-based distance from the head.
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.pending.lock().iter().position(|queued| *queued == id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
