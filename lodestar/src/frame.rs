//! Guide-camera frames.

use ndarray::{Array2, ArrayView2};
use std::time::Duration;

/// A single frame from the guide camera.
///
/// Pixel data is stored as `Array2<u16>` in (row, column) = (y, x) order,
/// matching the camera readout convention used throughout the workspace.
#[derive(Debug, Clone)]
pub struct GuideFrame {
    data: Array2<u16>,
    number: u64,
    exposure: Duration,
}

impl GuideFrame {
    pub fn new(data: Array2<u16>, number: u64, exposure: Duration) -> Self {
        Self {
            data,
            number,
            exposure,
        }
    }

    pub fn view(&self) -> ArrayView2<'_, u16> {
        self.data.view()
    }

    /// Frame width in pixels (columns).
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Frame height in pixels (rows).
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Monotonic frame sequence number assigned by the camera.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn exposure(&self) -> Duration {
        self.exposure
    }

    /// Mean and standard deviation over every pixel. Used for full-frame
    /// detection thresholds when scanning for guide star candidates.
    pub fn global_stats(&self) -> (f64, f64) {
        let n = self.data.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let mut sum = 0.0;
        let mut sumsq = 0.0;
        for &v in self.data.iter() {
            let v = v as f64;
            sum += v;
            sumsq += v * v;
        }
        let mean = sum / n as f64;
        let variance = (sumsq / n as f64 - mean * mean).max(0.0);
        (mean, variance.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dimensions() {
        let frame = GuideFrame::new(Array2::zeros((64, 128)), 1, Duration::from_millis(100));
        assert_eq!(frame.width(), 128);
        assert_eq!(frame.height(), 64);
        assert_eq!(frame.number(), 1);
    }

    #[test]
    fn test_global_stats_uniform() {
        let frame = GuideFrame::new(
            Array2::from_elem((16, 16), 500u16),
            0,
            Duration::from_millis(10),
        );
        let (mean, sigma) = frame.global_stats();
        assert_abs_diff_eq!(mean, 500.0);
        assert_abs_diff_eq!(sigma, 0.0);
    }
}
