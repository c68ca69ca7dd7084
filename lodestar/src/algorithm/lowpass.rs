//! Single-pole low-pass filter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowPass {
    /// Deadband in pixels.
    pub min_move: f64,
    /// Weight of the new input per step, (0, 1].
    pub smoothing: f64,
    #[serde(skip)]
    filtered: f64,
    #[serde(skip)]
    primed: bool,
}

impl LowPass {
    pub fn new(min_move: f64, smoothing: f64) -> Self {
        Self {
            min_move,
            smoothing,
            filtered: 0.0,
            primed: false,
        }
    }

    /// The filter state always tracks the input stream; the deadband only
    /// suppresses the emitted correction.
    pub fn compute(&mut self, input: f64) -> f64 {
        if self.primed {
            self.filtered += self.smoothing * (input - self.filtered);
        } else {
            self.filtered = input;
            self.primed = true;
        }
        if input.abs() < self.min_move {
            return 0.0;
        }
        self.filtered
    }

    pub fn reset(&mut self) {
        self.filtered = 0.0;
        self.primed = false;
    }
}

impl Default for LowPass {
    fn default() -> Self {
        Self::new(0.2, 0.5)
    }
}
