//! Resist-switch filter: refuses to reverse correction direction until the
//! sign change persists.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const HISTORY_LEN: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResistSwitch {
    /// Deadband in pixels.
    pub min_move: f64,
    /// Gain applied when a correction is emitted.
    pub aggression: f64,
    #[serde(skip)]
    history: VecDeque<f64>,
}

impl ResistSwitch {
    pub fn new(min_move: f64, aggression: f64) -> Self {
        Self {
            min_move,
            aggression,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    pub fn compute(&mut self, input: f64) -> f64 {
        let input = if input.abs() < self.min_move {
            0.0
        } else {
            input
        };

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(input);

        if input == 0.0 {
            return 0.0;
        }

        // Vote over recent history: a reversal against the prevailing
        // direction is held back until it wins the vote.
        let positive = self.history.iter().filter(|v| **v > 0.0).count();
        let negative = self.history.iter().filter(|v| **v < 0.0).count();
        let opposed = if input > 0.0 {
            negative > positive
        } else {
            positive > negative
        };
        if opposed {
            return 0.0;
        }

        input * self.aggression
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

impl Default for ResistSwitch {
    fn default() -> Self {
        Self::new(0.2, 1.0)
    }
}
