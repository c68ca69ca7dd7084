//! Star centroid and quality detection.
//!
//! `Star::find` runs a one-shot detection inside a search window: smoothed
//! peak location, iterative annulus background estimation, thresholded first
//! moments for the centroid, Simonetti SNR, and half-flux diameter. Detection
//! failure is never an error; it is reported through [`FindResult`].

use crate::frame::GuideFrame;
use crate::point::Point;
use serde::{Deserialize, Serialize};

/// SNR floor below which a detection is rejected.
pub const LOW_SNR: f64 = 3.0;

/// Mass floor below which a detection is rejected.
pub const LOW_MASS: f64 = 10.0;

/// Aperture radius for moment accumulation and the annulus inner edge.
const APERTURE_RADIUS: i64 = 7;

/// Annulus outer radius for background estimation.
const ANNULUS_OUTER: i64 = 12;

/// Maximum background refinement passes.
const MAX_BACKGROUND_PASSES: usize = 9;

/// Minimum surviving background samples per pass.
const MIN_BACKGROUND_SAMPLES: usize = 10;

/// Background mean convergence tolerance between passes (ADU).
const BACKGROUND_CONVERGENCE: f64 = 0.5;

/// Assumed camera gain (e-/ADU) in the SNR estimator.
const CAMERA_GAIN: f64 = 0.5;

/// Outcome of a `Star::find` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindResult {
    Ok,
    Saturated,
    LowSnr,
    LowMass,
    LowHfd,
    TooNearEdge,
    MassChange,
    Error,
}

/// Detection mode for `Star::find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindMode {
    /// Full centroid refinement with background estimation and HFD.
    Centroid,
    /// Brightest raw pixel only. Quick acquisition, not precision guiding.
    Peak,
}

/// A detected (or failed-to-detect) star. Immutable result of one `find`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Star {
    pub position: Point,
    /// Background-subtracted total flux over qualifying pixels.
    pub mass: f64,
    /// Signal-to-noise ratio per Simonetti's CCD estimator.
    pub snr: f64,
    /// Half-flux diameter in pixels.
    pub hfd: f64,
    /// Raw (unsmoothed) peak pixel value in the search window.
    pub peak: f64,
    pub result: FindResult,
}

/// One qualifying aperture pixel, kept for the half-flux radius computation.
struct FluxPixel {
    x: f64,
    y: f64,
    value: f64,
}

impl Star {
    /// A star that was never found, positioned at the last known location.
    pub fn not_found(position: Point, result: FindResult) -> Self {
        debug_assert!(result != FindResult::Ok && result != FindResult::Saturated);
        Self {
            position,
            mass: 0.0,
            snr: 0.0,
            hfd: 0.0,
            peak: 0.0,
            result,
        }
    }

    /// Whether the detection counts as found (OK or saturated).
    pub fn found(&self) -> bool {
        matches!(self.result, FindResult::Ok | FindResult::Saturated)
    }

    /// Locate a star near `(base_x, base_y)` within `search_region` pixels.
    ///
    /// `search_region` is clamped to [7, 50]. `min_hfd` applies in centroid
    /// mode only; `saturation` is the sensor full-scale value.
    pub fn find(
        frame: &GuideFrame,
        search_region: usize,
        base_x: f64,
        base_y: f64,
        mode: FindMode,
        min_hfd: f64,
        saturation: u16,
    ) -> Star {
        let region = (search_region as i64).clamp(7, 50);
        let width = frame.width() as i64;
        let height = frame.height() as i64;
        let base = Point::new(base_x, base_y);

        let base_xi = base_x.round() as i64;
        let base_yi = base_y.round() as i64;
        if base_xi < 0 || base_xi >= width || base_yi < 0 || base_yi >= height {
            return Star::not_found(base, FindResult::TooNearEdge);
        }

        // Window for the smoothed-peak scan; the 3x3 kernel needs a 1 px rim.
        let start_x = (base_xi - region).max(1);
        let end_x = (base_xi + region).min(width - 2);
        let start_y = (base_yi - region).max(1);
        let end_y = (base_yi + region).min(height - 2);
        if start_x > end_x || start_y > end_y {
            return Star::not_found(base, FindResult::TooNearEdge);
        }

        let img = frame.view();

        // Smoothed peak location; raw maximum tracked separately for the
        // saturation check.
        let mut smoothed_peak = 0u32;
        let mut peak_x = start_x;
        let mut peak_y = start_y;
        let mut raw_peak = 0u16;
        let mut raw_x = start_x;
        let mut raw_y = start_y;
        for y in start_y..=end_y {
            for x in start_x..=end_x {
                let p = |dx: i64, dy: i64| img[[(y + dy) as usize, (x + dx) as usize]] as u32;
                let smoothed = (4 * p(0, 0)
                    + 2 * (p(-1, 0) + p(1, 0) + p(0, -1) + p(0, 1))
                    + p(-1, -1)
                    + p(1, -1)
                    + p(-1, 1)
                    + p(1, 1))
                    / 16;
                if smoothed > smoothed_peak {
                    smoothed_peak = smoothed;
                    peak_x = x;
                    peak_y = y;
                }
                let raw = img[[y as usize, x as usize]];
                if raw > raw_peak {
                    raw_peak = raw;
                    raw_x = x;
                    raw_y = y;
                }
            }
        }

        if mode == FindMode::Peak {
            return Self::find_peak(frame, raw_x, raw_y, raw_peak, saturation);
        }

        // Iteratively estimate background mean/sigma in the annulus
        // APERTURE_RADIUS^2 < r^2 <= ANNULUS_OUTER^2 around the smoothed peak,
        // re-excluding samples more than 2 sigma from the previous mean.
        let bg_start_x = (peak_x - ANNULUS_OUTER).max(0);
        let bg_end_x = (peak_x + ANNULUS_OUTER).min(width - 1);
        let bg_start_y = (peak_y - ANNULUS_OUTER).max(0);
        let bg_end_y = (peak_y + ANNULUS_OUTER).min(height - 1);

        let mut mean = 0.0;
        let mut sigma = 0.0;
        let mut n_background = 0usize;
        for pass in 0..MAX_BACKGROUND_PASSES {
            let mut sum = 0.0;
            let mut sumsq = 0.0;
            let mut n = 0usize;
            for y in bg_start_y..=bg_end_y {
                for x in bg_start_x..=bg_end_x {
                    let dx = x - peak_x;
                    let dy = y - peak_y;
                    let r2 = dx * dx + dy * dy;
                    if r2 <= APERTURE_RADIUS * APERTURE_RADIUS
                        || r2 > ANNULUS_OUTER * ANNULUS_OUTER
                    {
                        continue;
                    }
                    let v = img[[y as usize, x as usize]] as f64;
                    if pass > 0 && (v - mean).abs() > 2.0 * sigma {
                        continue;
                    }
                    sum += v;
                    sumsq += v * v;
                    n += 1;
                }
            }
            if n < MIN_BACKGROUND_SAMPLES {
                log::debug!(
                    "star find: only {} background samples around ({}, {})",
                    n,
                    peak_x,
                    peak_y
                );
                return Star::not_found(
                    Point::new(peak_x as f64, peak_y as f64),
                    FindResult::Error,
                );
            }
            let new_mean = sum / n as f64;
            let variance = ((sumsq - sum * sum / n as f64) / (n as f64 - 1.0)).max(0.0);
            let new_sigma = variance.sqrt();
            n_background = n;
            let converged = pass > 0 && (new_mean - mean).abs() < BACKGROUND_CONVERGENCE;
            mean = new_mean;
            sigma = new_sigma;
            if converged {
                break;
            }
        }

        let threshold = (mean + 3.0 * sigma + 0.5).trunc();

        // First moments over the aperture, pixels at/above threshold.
        let ap_start_x = (peak_x - APERTURE_RADIUS).max(0);
        let ap_end_x = (peak_x + APERTURE_RADIUS).min(width - 1);
        let ap_start_y = (peak_y - APERTURE_RADIUS).max(0);
        let ap_end_y = (peak_y + APERTURE_RADIUS).min(height - 1);

        let mut moment_x = 0.0;
        let mut moment_y = 0.0;
        let mut mass = 0.0;
        let mut n_signal = 0usize;
        let mut flux_pixels: Vec<FluxPixel> = Vec::new();
        for y in ap_start_y..=ap_end_y {
            for x in ap_start_x..=ap_end_x {
                let dx = x - peak_x;
                let dy = y - peak_y;
                if dx * dx + dy * dy > APERTURE_RADIUS * APERTURE_RADIUS {
                    continue;
                }
                let v = img[[y as usize, x as usize]] as f64;
                if v < threshold {
                    continue;
                }
                let d = v - mean;
                moment_x += d * dx as f64;
                moment_y += d * dy as f64;
                mass += d;
                n_signal += 1;
                flux_pixels.push(FluxPixel {
                    x: x as f64,
                    y: y as f64,
                    value: d,
                });
            }
        }

        let noise_term = (mass / CAMERA_GAIN
            + sigma * sigma * n_signal as f64 * (1.0 + 1.0 / n_background as f64))
            .sqrt();
        let mut snr = if n_signal > 0 && noise_term > 0.0 {
            mass / noise_term
        } else {
            0.0
        };

        // A handful of stray above-threshold pixels can fake a decent SNR
        // while the smoothed peak itself never clears the threshold.
        if (smoothed_peak as f64) <= threshold && snr >= LOW_SNR {
            snr = LOW_SNR - 0.1;
        }

        let peak_position = Point::new(peak_x as f64, peak_y as f64);
        let raw_peak_f = raw_peak as f64;

        if mass < LOW_MASS {
            let mut star = Star::not_found(peak_position, FindResult::LowMass);
            star.mass = mass;
            star.snr = snr;
            star.peak = raw_peak_f;
            return star;
        }
        if snr < LOW_SNR {
            let mut star = Star::not_found(peak_position, FindResult::LowSnr);
            star.mass = mass;
            star.snr = snr;
            star.peak = raw_peak_f;
            return star;
        }

        let centroid_x = peak_x as f64 + moment_x / mass;
        let centroid_y = peak_y as f64 + moment_y / mass;
        let hfd = 2.0 * half_flux_radius(centroid_x, centroid_y, mass, &flux_pixels);

        let edge_margin = (1 + APERTURE_RADIUS) as f64;
        if centroid_x < edge_margin
            || centroid_x > (width - 1) as f64 - edge_margin
            || centroid_y < edge_margin
            || centroid_y > (height - 1) as f64 - edge_margin
        {
            let mut star = Star::not_found(
                Point::new(centroid_x, centroid_y),
                FindResult::TooNearEdge,
            );
            star.mass = mass;
            star.snr = snr;
            star.hfd = hfd;
            star.peak = raw_peak_f;
            return star;
        }

        if hfd < min_hfd {
            let mut star =
                Star::not_found(Point::new(centroid_x, centroid_y), FindResult::LowHfd);
            star.mass = mass;
            star.snr = snr;
            star.hfd = hfd;
            star.peak = raw_peak_f;
            return star;
        }

        let result = if raw_peak >= saturation {
            FindResult::Saturated
        } else {
            FindResult::Ok
        };

        Star {
            position: Point::new(centroid_x, centroid_y),
            mass,
            snr,
            hfd,
            peak: raw_peak_f,
            result,
        }
    }

    /// Peak mode: brightest raw pixel, single-pass background, no centroid
    /// refinement or HFD.
    fn find_peak(
        frame: &GuideFrame,
        raw_x: i64,
        raw_y: i64,
        raw_peak: u16,
        saturation: u16,
    ) -> Star {
        let img = frame.view();
        let width = frame.width() as i64;
        let height = frame.height() as i64;

        let bg_start_x = (raw_x - ANNULUS_OUTER).max(0);
        let bg_end_x = (raw_x + ANNULUS_OUTER).min(width - 1);
        let bg_start_y = (raw_y - ANNULUS_OUTER).max(0);
        let bg_end_y = (raw_y + ANNULUS_OUTER).min(height - 1);

        let mut sum = 0.0;
        let mut sumsq = 0.0;
        let mut n = 0usize;
        for y in bg_start_y..=bg_end_y {
            for x in bg_start_x..=bg_end_x {
                let dx = x - raw_x;
                let dy = y - raw_y;
                let r2 = dx * dx + dy * dy;
                if r2 <= APERTURE_RADIUS * APERTURE_RADIUS || r2 > ANNULUS_OUTER * ANNULUS_OUTER
                {
                    continue;
                }
                let v = img[[y as usize, x as usize]] as f64;
                sum += v;
                sumsq += v * v;
                n += 1;
            }
        }

        let (mean, sigma) = if n >= 2 {
            let mean = sum / n as f64;
            let variance = ((sumsq - sum * sum / n as f64) / (n as f64 - 1.0)).max(0.0);
            (mean, variance.sqrt())
        } else {
            (0.0, 0.0)
        };

        let mass = (raw_peak as f64 - mean).max(0.0);
        let snr = if sigma > 0.0 { mass / sigma } else { mass };

        let result = if mass < LOW_MASS {
            FindResult::LowMass
        } else if raw_peak >= saturation {
            FindResult::Saturated
        } else {
            FindResult::Ok
        };

        Star {
            position: Point::new(raw_x as f64, raw_y as f64),
            mass,
            snr,
            hfd: 0.0,
            peak: raw_peak as f64,
            result,
        }
    }
}

/// Radius of the circle around the centroid containing half the total flux.
fn half_flux_radius(cx: f64, cy: f64, mass: f64, pixels: &[FluxPixel]) -> f64 {
    let mut by_radius: Vec<(f64, f64)> = pixels
        .iter()
        .map(|p| ((p.x - cx).hypot(p.y - cy), p.value))
        .collect();
    by_radius.sort_by(|a, b| a.0.total_cmp(&b.0));

    let half = mass / 2.0;
    let mut accumulated = 0.0;
    let mut prev_radius = 0.0;
    for (radius, value) in by_radius {
        if accumulated + value >= half {
            if value > 0.0 {
                return prev_radius + (radius - prev_radius) * (half - accumulated) / value;
            }
            return radius;
        }
        accumulated += value;
        prev_radius = radius;
    }
    prev_radius
}
