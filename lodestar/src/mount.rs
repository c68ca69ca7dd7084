//! Guide-mount abstraction.
//!
//! The mount owns the calibration procedure: the guider feeds it measured
//! star positions while calibrating and receives typed progress back. Guide
//! corrections are handed over in mount (RA/Dec) coordinates after per-axis
//! filtering.

use crate::calibration::{Calibration, Parity};
use crate::point::Point;
use serde::{Deserialize, Serialize};

/// How a commanded move should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveMode {
    /// Filtered correction from the guide algorithms.
    GuideStep,
    /// Zero-offset move issued when the star was not found, keeping the
    /// guide cadence alive.
    DeadReckon,
    /// Bounded direct move during dither recentering, bypassing the filters.
    Direct,
}

/// The same physical displacement expressed in camera pixels and in mount
/// (RA/Dec) coordinates. Built fresh each frame.
#[derive(Debug, Clone, Copy)]
pub struct GuiderOffset {
    pub camera: Point,
    pub mount: Point,
}

/// Cardinal guide direction, in the mount's own convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

/// Progress snapshot for one calibration iteration.
#[derive(Debug, Clone)]
pub struct CalibrationStepInfo {
    pub direction: GuideDirection,
    pub step: u32,
    /// Displacement from the calibration start position.
    pub dx: f64,
    pub dy: f64,
    /// Current measured star position.
    pub position: Point,
    pub distance: f64,
}

/// Typed result of feeding one star position into the calibration routine.
#[derive(Debug, Clone)]
pub enum CalibrationUpdate {
    Step(CalibrationStepInfo),
    Complete(Calibration),
    Failed(String),
}

/// A guide mount. All notify_* callbacks are best-effort; the default
/// implementations do nothing.
pub trait GuideMount: Send {
    fn is_connected(&self) -> bool;

    fn is_calibrated(&self) -> bool;

    /// Whether the mount is currently accepting guide corrections.
    fn guiding_enabled(&self) -> bool;

    /// Whether corrections should be applied on the RA axis only.
    fn guiding_ra_only(&self) -> bool;

    /// Whether the mount is busy with a non-guiding motion (slew, park).
    fn is_busy(&self) -> bool;

    fn ra_parity(&self) -> Parity;

    fn dec_parity(&self) -> Parity;

    /// Current declination, radians.
    fn declination(&self) -> f64;

    /// Start the calibration routine from the given star position. Returns
    /// false if the mount cannot calibrate right now.
    fn begin_calibration(&mut self, start: Point) -> bool;

    /// Feed one measured star position into the calibration routine.
    fn update_calibration_state(&mut self, star: Point) -> CalibrationUpdate;

    /// Most recent completed calibration, if any.
    fn calibration(&self) -> Option<Calibration>;

    /// Express a camera-frame displacement in mount coordinates using the
    /// current calibration.
    fn camera_to_mount(&self, camera: Point) -> Point;

    /// Apply a correction in mount coordinates. Returns false on a move
    /// failure; the guider treats that as a dropped frame, not a fault.
    fn move_offset(&mut self, correction: Point, mode: MoveMode) -> bool;

    fn notify_guiding_started(&mut self) {}

    fn notify_guiding_stopped(&mut self) {}

    fn notify_guiding_paused(&mut self) {}

    fn notify_guiding_resumed(&mut self) {}

    fn notify_guiding_dithered(&mut self, _dx: f64, _dy: f64, _mount_coords: bool) {}

    fn notify_dither_settle_done(&mut self, _success: bool) {}

    fn notify_direct_move(&mut self, _distance: f64) {}
}
