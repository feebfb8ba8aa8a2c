use std::collections::VecDeque;

/// Fixed-capacity ordered sequence of samples. Appending past capacity
/// evicts the oldest sample.
#[derive(Clone, Debug)]
pub struct RollingWindow<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "window capacity must be positive");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.samples.iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.samples.back()
    }
}

impl RollingWindow<f64> {
    pub fn sum(&self) -> f64 {
        self.samples.iter().sum()
    }

    /// Arithmetic mean; 0 when the window is empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum() / self.samples.len() as f64
    }
}

impl RollingWindow<bool> {
    /// Fraction of `true` samples; 0 when the window is empty.
    pub fn ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let set = self.samples.iter().filter(|sample| **sample).count();
        set as f64 / self.samples.len() as f64
    }
}
