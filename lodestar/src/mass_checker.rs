//! Sliding-window flux gate.
//!
//! Rejects a newly found star when its flux diverges from recent history,
//! which usually means a cloud, a hot pixel, or a wrong star. Masses are only
//! comparable within one exposure regime, so history is cleared whenever the
//! regime changes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default retention window for mass history.
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(45);

/// Low-water drift fraction toward the median per check.
const LOW_WATER_DRIFT: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
struct Entry {
    time: Instant,
    mass: f64,
}

/// Limits in effect when a mass was checked, for caller-side logging.
/// Values are de-adjusted back to raw mass units under auto-exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassCheck {
    pub reject: bool,
    pub low_limit: f64,
    pub high_limit: f64,
    pub spike_limit: f64,
}

#[derive(Debug)]
pub struct MassChecker {
    window: Duration,
    data: VecDeque<Entry>,
    high_water: Option<f64>,
    low_water: Option<f64>,
    exposure: f64,
    auto_exposure: bool,
}

impl MassChecker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_TIME_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            data: VecDeque::new(),
            high_water: None,
            low_water: None,
            exposure: 1.0,
            auto_exposure: false,
        }
    }

    /// Record the current exposure regime. Toggling auto-exposure, or changing
    /// the fixed exposure length outside auto mode, clears history.
    pub fn set_exposure(&mut self, exposure: Duration, auto: bool) {
        let secs = exposure.as_secs_f64();
        if auto != self.auto_exposure {
            self.auto_exposure = auto;
            self.reset();
        } else if !auto && (secs - self.exposure).abs() > f64::EPSILON {
            self.reset();
        }
        self.exposure = secs;
    }

    fn adjusted_mass(&self, mass: f64) -> f64 {
        if self.auto_exposure && self.exposure > 0.0 {
            mass / self.exposure
        } else {
            mass
        }
    }

    /// Append a mass sample, purging entries older than the window first.
    pub fn add(&mut self, mass: f64) {
        self.add_at(mass, Instant::now());
    }

    fn add_at(&mut self, mass: f64, now: Instant) {
        while let Some(front) = self.data.front() {
            if now.duration_since(front.time) > self.window {
                self.data.pop_front();
            } else {
                break;
            }
        }
        self.data.push_back(Entry {
            time: now,
            mass: self.adjusted_mass(mass),
        });
    }

    /// Check a candidate mass against recent history.
    ///
    /// Returns `None` (no rejection, no limits) until at least 5 samples have
    /// been recorded.
    pub fn check_mass(&mut self, mass: f64, threshold: f64) -> Option<MassCheck> {
        if self.data.len() < 5 {
            return None;
        }

        let mut masses: Vec<f64> = self.data.iter().map(|e| e.mass).collect();
        masses.sort_by(f64::total_cmp);
        let median = masses[masses.len() / 2];

        // High-water only increases; low-water snaps down but drifts up
        // toward the median slowly, tracking sky-brightness changes.
        self.high_water = Some(match self.high_water {
            Some(high) => high.max(median),
            None => median,
        });
        self.low_water = Some(match self.low_water {
            Some(low) if median >= low => low + LOW_WATER_DRIFT * (median - low),
            _ => median,
        });

        let low = self.low_water.unwrap();
        let high = self.high_water.unwrap();

        let low_limit = low * (1.0 - threshold);
        let high_limit = high * (1.0 + threshold);
        let spike_limit = median * (1.0 + 2.0 * threshold);

        let adjusted = self.adjusted_mass(mass);
        let reject = adjusted < low_limit || adjusted > high_limit || adjusted > spike_limit;

        let scale = if self.auto_exposure { self.exposure } else { 1.0 };
        Some(MassCheck {
            reject,
            low_limit: low_limit * scale,
            high_limit: high_limit * scale,
            spike_limit: spike_limit * scale,
        })
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.high_water = None;
        self.low_water = None;
    }
}

impl Default for MassChecker {
    fn default() -> Self {
        Self::new()
    }
}
