//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Lock-position drift rate in mount coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LockShiftRate {
    pub ra_arcsec_per_hour: f64,
    pub dec_arcsec_per_hour: f64,
}

/// Guider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuiderConfig {
    /// Star search radius around the expected position (pixels).
    pub search_region: usize,
    /// Minimum acceptable half-flux diameter (pixels).
    pub min_hfd: f64,
    /// Enable flux-history gating of the primary star.
    pub mass_change_check: bool,
    /// Relative mass deviation tolerated by the flux gate.
    pub mass_change_threshold: f64,
    /// Mass history retention (seconds).
    pub mass_time_window_secs: f64,
    /// Enable positional-jump gating while guiding.
    pub distance_check: bool,
    /// Star-to-lock distance considered implausible (pixels).
    pub distance_tolerance: f64,
    /// Consecutive violations before a large jump is accepted as real.
    pub distance_max_violations: u32,
    /// Keep a lost star selected while looping instead of deselecting.
    pub ignore_lost_star_looping: bool,
    /// Enable multi-star offset refinement.
    pub multi_star: bool,
    /// Secondary stars tracked at most.
    pub max_secondary_stars: usize,
    /// Sigma multiple of primary displacement that enters the stabilizing
    /// state.
    pub stability_sigma: f64,
    /// Largest single direct move during dither recentering (pixels).
    pub fast_recenter_max_step: f64,
    /// Residual distance ending dither settling (pixels).
    pub settle_tolerance: f64,
    /// Settling deadline after a dither (seconds).
    pub settle_timeout_secs: f64,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        Self {
            search_region: 15,
            min_hfd: 1.5,
            mass_change_check: true,
            mass_change_threshold: 0.5,
            mass_time_window_secs: 45.0,
            distance_check: true,
            distance_tolerance: 5.0,
            distance_max_violations: 3,
            ignore_lost_star_looping: false,
            multi_star: true,
            max_secondary_stars: 8,
            stability_sigma: 5.0,
            fast_recenter_max_step: 3.0,
            settle_tolerance: 1.5,
            settle_timeout_secs: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GuiderConfig::default();
        assert_eq!(config.search_region, 15);
        assert_eq!(config.distance_max_violations, 3);
        assert!(config.multi_star);
        assert!(config.settle_tolerance < config.distance_tolerance);
    }
}
