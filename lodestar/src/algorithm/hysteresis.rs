//! Hysteresis filter: blends the new offset with the previous correction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hysteresis {
    /// Deadband in pixels.
    pub min_move: f64,
    /// Weight of the previous correction, [0, 1).
    pub hysteresis: f64,
    /// Overall gain applied to the blended value.
    pub aggression: f64,
    #[serde(skip)]
    last_move: f64,
}

impl Hysteresis {
    pub fn new(min_move: f64, hysteresis: f64, aggression: f64) -> Self {
        Self {
            min_move,
            hysteresis,
            aggression,
            last_move: 0.0,
        }
    }

    /// Below-deadband inputs emit zero and also zero the filter memory.
    /// That is the shipped behavior, kept as-is; see DESIGN.md for the
    /// deadband-semantics question around it.
    pub fn compute(&mut self, input: f64) -> f64 {
        let mut result =
            self.aggression * ((1.0 - self.hysteresis) * input + self.hysteresis * self.last_move);
        if input.abs() < self.min_move {
            result = 0.0;
            self.last_move = 0.0;
        } else {
            self.last_move = result;
        }
        result
    }

    pub fn reset(&mut self) {
        self.last_move = 0.0;
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self::new(0.2, 0.1, 0.7)
    }
}
