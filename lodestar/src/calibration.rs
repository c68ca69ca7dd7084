//! Camera-to-mount geometric model.

use crate::point::Point;
use serde::{Deserialize, Serialize};

/// Whether a guide pulse in a given direction increases or decreases the
/// corresponding mount coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    Even,
    Odd,
    Unknown,
    Unchanged,
}

/// Measured mapping between camera pixel axes and mount RA/Dec motion axes.
/// Immutable snapshot once computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calibration {
    /// Camera-frame angle of the RA axis, radians.
    pub x_angle: f64,
    /// Measured deviation of the Dec axis from exact orthogonality, radians.
    pub y_angle_error: f64,
    pub ra_parity: Parity,
    pub dec_parity: Parity,
}

impl Calibration {
    pub fn new(x_angle: f64, y_angle_error: f64, ra_parity: Parity, dec_parity: Parity) -> Self {
        Self {
            x_angle,
            y_angle_error,
            ra_parity,
            dec_parity,
        }
    }

    /// Express a camera-frame displacement in mount (RA/Dec) coordinates.
    pub fn camera_to_mount(&self, camera: Point) -> Point {
        let hyp = camera.norm();
        let theta = camera.theta();
        Point::new(
            (theta - self.x_angle).cos() * hyp,
            (theta - (self.x_angle + self.y_angle_error)).sin() * hyp,
        )
    }

    /// Express a mount (RA/Dec) displacement in camera-frame coordinates.
    /// Inverse of [`camera_to_mount`](Self::camera_to_mount); used to turn a
    /// mount-space lock shift rate into a camera-space rate.
    pub fn mount_to_camera(&self, mount: Point) -> Point {
        let dec_angle = self.x_angle + self.y_angle_error;
        Point::new(
            mount.x() * self.x_angle.cos() - mount.y() * dec_angle.sin(),
            mount.x() * self.x_angle.sin() + mount.y() * dec_angle.cos(),
        )
    }
}
