//! LODESTAR - Lock-On Drift Estimation & Star Tracking Autoguiding Runtime
//!
//! Autoguiding engine for a telescope-control suite. Guide-camera frames
//! flow through star detection, statistical gating, and per-axis correction
//! filters into mount move commands, driven by a calibration and guiding
//! state machine:
//!
//! capture -> frame -> `Guider::update_guide` -> `Star::find` (+ mass and
//! distance gates) -> state transition -> multi-star refinement ->
//! calibration transform -> correction filters -> `GuideMount::move_offset`,
//! with listener callbacks fanning out status at every step.
//!
//! The engine never talks to hardware directly; it consumes the
//! [`camera::GuideCamera`] and [`mount::GuideMount`] abstractions only.

pub mod algorithm;
pub mod calibration;
pub mod camera;
pub mod capture;
pub mod config;
pub mod distance_checker;
pub mod event;
pub mod frame;
pub mod guider;
pub mod mass_checker;
pub mod mount;
pub mod multistar;
pub mod point;
pub mod star;
pub mod stats;

#[cfg(test)]
mod test_util;

pub use algorithm::{GuideAlgorithm, Hysteresis, LowPass, ResistSwitch};
pub use calibration::{Calibration, Parity};
pub use camera::{CameraInfo, ExposureGate, ExposureNotifier, ExposureOutcome, GuideCamera};
pub use capture::{CaptureHandle, GuiderCommand};
pub use config::{GuiderConfig, LockShiftRate};
pub use event::{GuideEvent, GuideStepInfo, ListenerId};
pub use frame::GuideFrame;
pub use guider::{Guider, GuiderError, GuiderState};
pub use mount::{
    CalibrationStepInfo, CalibrationUpdate, GuideDirection, GuideMount, GuiderOffset, MoveMode,
};
pub use point::Point;
pub use star::{FindMode, FindResult, Star};
