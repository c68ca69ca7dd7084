//! Listener fan-out for guiding progress.
//!
//! Registered callbacks are invoked synchronously on the processing thread
//! for every event; they are best-effort and return nothing.

use crate::calibration::Calibration;
use crate::mount::CalibrationStepInfo;
use crate::point::Point;
use crate::star::{FindResult, Star};
use serde::{Deserialize, Serialize};

/// Per-frame guide step telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuideStepInfo {
    pub frame: u64,
    /// Measured star-to-lock offset, camera pixels.
    pub camera_dx: f64,
    pub camera_dy: f64,
    /// The same offset in mount coordinates.
    pub mount_dx: f64,
    pub mount_dy: f64,
    /// Filtered corrections handed to the mount.
    pub ra_correction: f64,
    pub dec_correction: f64,
    pub mass: f64,
    pub snr: f64,
    pub hfd: f64,
    /// Stars contributing to the offset estimate this frame.
    pub stars_used: usize,
    /// Smoothed distance estimate at this step.
    pub avg_distance: f64,
}

/// Guiding progress notifications.
#[derive(Debug, Clone)]
pub enum GuideEvent {
    LockPositionChanged { position: Point },
    StarSelected { position: Point },
    GuidingDithered { dx: f64, dy: f64 },
    CalibrationFailed { reason: String },
    GuidingStopped,
    LockShiftLimitReached,
    Looping { frame: u64, star: Option<Star> },
    StarLost { result: FindResult },
    LockPositionLost,
    CalibrationStarted,
    CalibrationStep(CalibrationStepInfo),
    CalibrationCompleted { calibration: Calibration },
    GuideStep(GuideStepInfo),
}

/// Identifier returned by `register`, usable to unregister.
pub type ListenerId = usize;

type Callback = Box<dyn FnMut(&GuideEvent) + Send>;

/// Callback registry.
#[derive(Default)]
pub(crate) struct Listeners {
    callbacks: Vec<(ListenerId, Callback)>,
    next_id: ListenerId,
}

impl Listeners {
    pub fn register(&mut self, callback: impl FnMut(&GuideEvent) + Send + 'static) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cb_id, _)| *cb_id != id);
        self.callbacks.len() != before
    }

    pub fn emit(&mut self, event: &GuideEvent) {
        log::trace!("event: {event:?}");
        for (_, callback) in self.callbacks.iter_mut() {
            callback(event);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.callbacks.len())
            .finish()
    }
}
