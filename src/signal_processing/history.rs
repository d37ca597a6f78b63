use std::collections::VecDeque;

/// Default number of headings kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Bounded history of normalized headings
///
/// Insertion ordered; once full, the oldest heading is evicted for each new
/// one.
#[derive(Debug, Clone)]
pub struct HeadingHistory {
    buffer: VecDeque<f64>,
    capacity: usize,
}

impl HeadingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a normalized heading, evicting the oldest when full
    pub fn push(&mut self, heading: f64) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(heading);
    }

    /// Latest N headings in chronological order (oldest to newest)
    pub fn latest(&self, count: usize) -> Vec<f64> {
        let len = self.buffer.len().min(count);
        self.buffer.iter().skip(self.buffer.len() - len).copied().collect()
    }

    /// All headings in chronological order
    pub fn to_vec(&self) -> Vec<f64> {
        self.buffer.iter().copied().collect()
    }

    pub fn last(&self) -> Option<f64> {
        self.buffer.back().copied()
    }

    /// Linear (min, max) of the stored headings
    pub fn min_max(&self) -> Option<(f64, f64)> {
        let first = *self.buffer.front()?;
        Some(
            self.buffer
                .iter()
                .fold((first, first), |(lo, hi), &h| (lo.min(h), hi.max(h))),
        )
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for HeadingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
