//! Positional-jump gate.
//!
//! A single noisy frame can report a star far from where it belongs. Rather
//! than chase it, the checker rejects implausible jumps until they persist
//! for a few consecutive frames, at which point the motion is taken as real.

/// Consecutive out-of-tolerance frames required before a jump is accepted.
pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Distances have been in tolerance.
    Settled,
    /// Out-of-tolerance distances seen; counting the streak.
    Waiting { violations: u32 },
    /// The streak was reached: the star really moved. Accept distances
    /// until one lands back in tolerance.
    Recovering,
}

#[derive(Debug)]
pub struct DistanceChecker {
    enabled: bool,
    max_violations: u32,
    state: State,
}

impl DistanceChecker {
    pub fn new(enabled: bool, max_violations: u32) -> Self {
        Self {
            enabled,
            max_violations: max_violations.max(1),
            state: State::Settled,
        }
    }

    /// Arm suspicion after a detection failure elsewhere: any in-progress
    /// violation streak is discarded.
    pub fn activate(&mut self) {
        if self.enabled {
            self.state = State::Waiting { violations: 0 };
        }
    }

    /// Check a star-to-lock distance. Returns `false` to reject the frame.
    pub fn check_distance(&mut self, distance: f64, ra_only: bool, tolerance: f64) -> bool {
        if !self.enabled {
            return true;
        }
        let in_tolerance = distance <= tolerance;
        log::trace!(
            "distance check: d={distance:.2} tol={tolerance:.2} ra_only={ra_only} state={:?}",
            self.state
        );
        match self.state {
            State::Settled => {
                if in_tolerance {
                    true
                } else {
                    self.state = State::Waiting { violations: 1 };
                    false
                }
            }
            State::Waiting { violations } => {
                if in_tolerance {
                    self.state = State::Settled;
                    true
                } else if violations + 1 >= self.max_violations {
                    log::info!(
                        "distance check: {} consecutive violations, accepting move of {distance:.2} px",
                        violations + 1
                    );
                    self.state = State::Recovering;
                    true
                } else {
                    self.state = State::Waiting {
                        violations: violations + 1,
                    };
                    false
                }
            }
            State::Recovering => {
                if in_tolerance {
                    self.state = State::Settled;
                }
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Settled;
    }
}
