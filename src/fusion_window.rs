//! Fixed-capacity sample ring owned by the coordinator.
//!
//! `push` never allocates: the backing storage is sized once in `new`.
//! Readers only ever get a copy (`snapshot` / `snapshot_into`), so inference
//! works on a frozen window while the sampler keeps pushing.

use crate::types::Sample;

/// An ordered, owned copy of a full fusion window (oldest first).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Window {
    samples: Vec<Sample>,
}

impl Window {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity) }
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Largest raw |a| in the window, in g.
    pub fn peak_accel_magnitude(&self) -> f64 {
        self.samples
            .iter()
            .map(Sample::accel_magnitude)
            .fold(0.0_f64, f64::max)
    }
}

pub struct FusionWindow {
    buffer: Vec<Sample>,
    head: usize,
    len: usize,
    total_pushed: u64,
}

impl FusionWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fusion window capacity must be non-zero");
        Self {
            buffer: vec![Sample::default(); capacity],
            head: 0,
            len: 0,
            total_pushed: 0,
        }
    }

    /// O(1). Evicts the oldest sample once the window is full.
    pub fn push(&mut self, sample: Sample) {
        let capacity = self.buffer.len();
        if self.len < capacity {
            self.buffer[(self.head + self.len) % capacity] = sample;
            self.len += 1;
        } else {
            self.buffer[self.head] = sample;
            self.head = (self.head + 1) % capacity;
        }
        self.total_pushed += 1;
    }

    /// Drops the current contents; the window has to warm up again.
    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn is_ready(&self) -> bool {
        self.len == self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn snapshot(&self) -> Option<Window> {
        let mut window = Window::with_capacity(self.capacity());
        self.snapshot_into(&mut window).then_some(window)
    }

    /// Copies the ordered contents into `out`, reusing its allocation.
    /// Returns false (leaving `out` untouched) while the window is not ready.
    pub fn snapshot_into(&self, out: &mut Window) -> bool {
        if !self.is_ready() {
            return false;
        }
        let capacity = self.buffer.len();
        out.samples.clear();
        out.samples.extend_from_slice(&self.buffer[self.head..]);
        out.samples.extend_from_slice(&self.buffer[..self.head]);
        debug_assert_eq!(out.samples.len(), capacity);
        true
    }
}
