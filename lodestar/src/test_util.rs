//! Synthetic frame helpers shared by unit tests.

use crate::frame::GuideFrame;
use ndarray::Array2;
use std::time::Duration;

/// Noiseless Gaussian star field on a flat background of 100 ADU.
/// Stars are given as `(x, y, amplitude)`.
pub(crate) fn synth_frame(
    width: usize,
    height: usize,
    stars: &[(f64, f64, f64)],
) -> GuideFrame {
    let mut data = Array2::<f64>::from_elem((height, width), 100.0);
    for &(cx, cy, amplitude) in stars {
        let sigma = 1.6f64;
        let radius = 8i64;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = cx.round() as i64 + dx;
                let y = cy.round() as i64 + dy;
                if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                    continue;
                }
                let fx = x as f64 - cx;
                let fy = y as f64 - cy;
                let r2 = fx * fx + fy * fy;
                data[[y as usize, x as usize]] += amplitude * (-r2 / (2.0 * sigma * sigma)).exp();
            }
        }
    }
    GuideFrame::new(
        data.mapv(|v| v.round().clamp(0.0, 65535.0) as u16),
        0,
        Duration::from_millis(100),
    )
}
