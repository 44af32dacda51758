//! Fixed-capacity ring buffer of recent frame times.

/// Ring buffer of frame times in milliseconds. Once full, each push
/// overwrites the oldest sample.
#[derive(Debug, Clone)]
pub struct FrameTimeHistory {
    samples: Box<[f64]>,
    head: usize,
    len: usize,
}

impl FrameTimeHistory {
    /// Create a history holding up to `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, frame_time_ms: f64) {
        self.samples[self.head] = frame_time_ms;
        self.head = (self.head + 1) % self.samples.len();
        self.len = (self.len + 1).min(self.samples.len());
    }

    /// Mean of the retained samples, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.len as f64)
    }

    pub fn max(&self) -> Option<f64> {
        self.iter().reduce(f64::max)
    }

    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.samples.len() - 1) % self.samples.len();
        Some(self.samples[idx])
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let cap = self.samples.len();
        let start = (self.head + cap - self.len) % cap;
        (0..self.len).map(move |i| self.samples[(start + i) % cap])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
