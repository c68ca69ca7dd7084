//! Synthetic star-frame helpers shared by integration tests.

#![allow(dead_code)]

use lodestar::GuideFrame;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Create a synthetic star frame with Gaussian PSFs and uniform noise.
///
/// Stars are given as `(x, y, amplitude)`; the PSF has FWHM ~3 px.
pub fn create_synthetic_frame(
    width: usize,
    height: usize,
    stars: &[(f64, f64, f64)],
    seed: u64,
) -> GuideFrame {
    let mut frame = Array2::<f64>::zeros((height, width));

    for &(x_center, y_center, amplitude) in stars {
        let sigma = 3.0 / 2.355;
        let sigma2 = sigma * sigma;

        let radius = 8;
        let x_min = (x_center as i64 - radius).max(0) as usize;
        let x_max = ((x_center as i64 + radius).min(width as i64 - 1) as usize) + 1;
        let y_min = (y_center as i64 - radius).max(0) as usize;
        let y_max = ((y_center as i64 + radius).min(height as i64 - 1) as usize) + 1;

        for y in y_min..y_max {
            for x in x_min..x_max {
                let dx = x as f64 - x_center;
                let dy = y as f64 - y_center;
                let r2 = dx * dx + dy * dy;
                frame[[y, x]] += amplitude * (-r2 / (2.0 * sigma2)).exp();
            }
        }
    }

    // Background plus uniform noise
    let background = 100.0;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for pixel in frame.iter_mut() {
        *pixel += background + rng.random_range(-10.0..10.0);
    }

    GuideFrame::new(
        frame.mapv(|v| v.round().clamp(0.0, 65535.0) as u16),
        0,
        Duration::from_millis(100),
    )
}

/// Frame with every star shifted by `(dx, dy)`, simulating drift.
pub fn create_shifted_frame(
    width: usize,
    height: usize,
    base_stars: &[(f64, f64, f64)],
    dx: f64,
    dy: f64,
    seed: u64,
) -> GuideFrame {
    let shifted: Vec<_> = base_stars
        .iter()
        .map(|&(x, y, amp)| (x + dx, y + dy, amp))
        .collect();
    create_synthetic_frame(width, height, &shifted, seed)
}
