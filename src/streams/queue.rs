use super::{StreamResult, error::StreamError};
use std::collections::VecDeque;

struct QueueEntry<T> {
    chunk: T,
    size: f64,
}

/// FIFO of chunks with their strategy-assigned sizes and a running total.
pub(crate) struct ChunkQueue<T> {
    entries: VecDeque<QueueEntry<T>>,
    total_size: f64,
}

impl<T> ChunkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            total_size: 0.0,
        }
    }

    pub(crate) fn enqueue_value_with_size(&mut self, chunk: T, size: f64) -> StreamResult<()> {
        if !size.is_finite() || size < 0.0 {
            return Err(StreamError::range_error(
                "chunk size must be a finite, non-negative number",
            ));
        }
        self.entries.push_back(QueueEntry { chunk, size });
        self.total_size += size;
        Ok(())
    }

    pub(crate) fn dequeue_value(&mut self) -> Option<T> {
        let entry = self.entries.pop_front()?;
        self.total_size -= entry.size;
        // Fractional sizes can leave rounding residue below zero.
        if self.total_size < 0.0 || self.entries.is_empty() {
            self.total_size = 0.0;
        }
        Some(entry.chunk)
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.total_size = 0.0;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_size(&self) -> f64 {
        self.total_size
    }
}
