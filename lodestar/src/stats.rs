//! Running statistics over a sample stream.

use std::collections::VecDeque;

/// Count/mean/sigma accumulator using Welford's online algorithm.
///
/// Can run unbounded or over a sliding window of the most recent N samples.
/// The windowed form keeps the raw samples so that evicted values can be
/// removed from the running moments.
#[derive(Debug, Clone)]
pub struct DescriptiveStats {
    window: Option<usize>,
    samples: VecDeque<f64>,
    mean: f64,
    m2: f64,
}

impl DescriptiveStats {
    /// Accumulator over all samples ever added (until `clear`).
    pub fn new() -> Self {
        Self {
            window: None,
            samples: VecDeque::new(),
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Accumulator over a sliding window of the last `window` samples.
    pub fn windowed(window: usize) -> Self {
        assert!(window >= 2, "window must hold at least 2 samples");
        Self {
            window: Some(window),
            samples: VecDeque::with_capacity(window),
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn add_value(&mut self, value: f64) {
        if let Some(limit) = self.window {
            if self.samples.len() == limit {
                let oldest = self.samples.pop_front().unwrap();
                self.remove(oldest);
            }
        }
        self.samples.push_back(value);

        let n = self.samples.len() as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
    }

    // Welford downdate: inverse of the update step above.
    fn remove(&mut self, value: f64) {
        let n = self.samples.len() as f64;
        if n == 0.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let old_mean = (n + 1.0) * self.mean - value;
        let new_mean = old_mean / n;
        self.m2 -= (value - self.mean) * (value - new_mean);
        self.mean = new_mean;
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation. Zero until two samples are present.
    pub fn sigma(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        (self.m2 / (n as f64 - 1.0)).sqrt()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

impl Default for DescriptiveStats {
    fn default() -> Self {
        Self::new()
    }
}
