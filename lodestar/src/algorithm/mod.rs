//! Per-axis guide correction filters.
//!
//! A filter takes the raw measured offset on one mount axis and produces a
//! damped correction. The set of filters is closed and chosen by
//! configuration, so dispatch is a plain enum rather than trait objects.

mod hysteresis;
mod lowpass;
mod resist_switch;

pub use hysteresis::Hysteresis;
pub use lowpass::LowPass;
pub use resist_switch::ResistSwitch;

use serde::{Deserialize, Serialize};

/// One of the available per-axis correction filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GuideAlgorithm {
    Hysteresis(Hysteresis),
    LowPass(LowPass),
    ResistSwitch(ResistSwitch),
}

impl GuideAlgorithm {
    /// Raw per-axis offset in, damped correction out.
    pub fn compute(&mut self, input: f64) -> f64 {
        match self {
            GuideAlgorithm::Hysteresis(a) => a.compute(input),
            GuideAlgorithm::LowPass(a) => a.compute(input),
            GuideAlgorithm::ResistSwitch(a) => a.compute(input),
        }
    }

    /// Discard filter memory.
    pub fn reset(&mut self) {
        match self {
            GuideAlgorithm::Hysteresis(a) => a.reset(),
            GuideAlgorithm::LowPass(a) => a.reset(),
            GuideAlgorithm::ResistSwitch(a) => a.reset(),
        }
    }

    /// Deadband below which no correction is emitted.
    pub fn min_move(&self) -> f64 {
        match self {
            GuideAlgorithm::Hysteresis(a) => a.min_move,
            GuideAlgorithm::LowPass(a) => a.min_move,
            GuideAlgorithm::ResistSwitch(a) => a.min_move,
        }
    }
}

impl Default for GuideAlgorithm {
    fn default() -> Self {
        GuideAlgorithm::Hysteresis(Hysteresis::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_dispatch_reset() {
        let mut algo = GuideAlgorithm::default();
        algo.compute(1.0);
        algo.reset();
        // After reset the filter behaves like a fresh instance.
        let fresh = GuideAlgorithm::default().compute(1.0);
        assert_eq!(algo.compute(1.0), fresh);
    }

    #[test]
    fn test_default_min_move() {
        assert_eq!(GuideAlgorithm::default().min_move(), 0.2);
    }
}
