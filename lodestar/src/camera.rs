//! Guide-camera abstraction and the exposure completion handoff.
//!
//! Triggering an exposure is asynchronous at the hardware layer: a device
//! event thread delivers the terminal outcome. The handoff is a one-shot
//! channel with a mandatory timeout, so a device that never reports anything
//! produces a `TimedOut` outcome instead of a stalled capture loop.

use crate::frame::GuideFrame;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Extra wait beyond the commanded exposure before giving up on the device.
pub const CAPTURE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera is not connected")]
    NotConnected,
    #[error("an exposure is already in progress")]
    Busy,
    #[error("device error: {0}")]
    Device(String),
}

/// Terminal outcome of one exposure.
#[derive(Debug)]
pub enum ExposureOutcome {
    Frame(GuideFrame),
    Aborted,
    Failed(String),
    Detached,
    /// No terminal event arrived within the wait deadline.
    TimedOut,
}

/// Device-event side of the exposure handoff. Cloneable so a notification
/// thread can hold it; only the first outcome delivered wins.
#[derive(Debug, Clone)]
pub struct ExposureNotifier {
    tx: Sender<ExposureOutcome>,
}

impl ExposureNotifier {
    pub fn frame(&self, frame: GuideFrame) {
        let _ = self.tx.try_send(ExposureOutcome::Frame(frame));
    }

    pub fn aborted(&self) {
        let _ = self.tx.try_send(ExposureOutcome::Aborted);
    }

    pub fn failed(&self, message: impl Into<String>) {
        let _ = self.tx.try_send(ExposureOutcome::Failed(message.into()));
    }

    pub fn detached(&self) {
        let _ = self.tx.try_send(ExposureOutcome::Detached);
    }
}

/// Consumer side of the exposure handoff.
#[derive(Debug)]
pub struct ExposureGate {
    rx: Receiver<ExposureOutcome>,
}

impl ExposureGate {
    pub fn pair() -> (ExposureNotifier, ExposureGate) {
        let (tx, rx) = bounded(1);
        (ExposureNotifier { tx }, ExposureGate { rx })
    }

    /// Block until the device reports a terminal outcome or the deadline
    /// passes.
    pub fn wait(&self, timeout: Duration) -> ExposureOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => ExposureOutcome::TimedOut,
        }
    }
}

/// Sticky cancellation flag shared between a camera and its controller.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Static camera properties the guider needs up front.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraInfo {
    pub width: usize,
    pub height: usize,
    /// Arcseconds per pixel.
    pub pixel_scale: f64,
    /// Sensor full-scale ADU value.
    pub saturation_adu: u16,
}

/// A guide camera. Implementations deliver each exposure's terminal outcome
/// through the provided [`ExposureNotifier`], typically from a device event
/// thread.
pub trait GuideCamera: Send {
    /// (width, height) in pixels.
    fn dimensions(&self) -> (usize, usize);

    /// Arcseconds per pixel.
    fn pixel_scale(&self) -> f64;

    /// Currently configured exposure duration.
    fn exposure(&self) -> Duration;

    /// Whether the camera is managing exposure automatically.
    fn auto_exposure(&self) -> bool;

    /// Sensor full-scale ADU value.
    fn saturation_adu(&self) -> u16;

    fn info(&self) -> CameraInfo {
        let (width, height) = self.dimensions();
        CameraInfo {
            width,
            height,
            pixel_scale: self.pixel_scale(),
            saturation_adu: self.saturation_adu(),
        }
    }

    /// Start an exposure. The outcome arrives through `notifier`.
    fn begin_exposure(
        &mut self,
        duration: Duration,
        notifier: ExposureNotifier,
    ) -> Result<(), CameraError>;

    /// Abort any in-flight exposure. The pending notifier must still receive
    /// a terminal outcome promptly.
    fn abort_exposure(&mut self);
}

/// Blocking capture: begin an exposure and wait for its outcome, with the
/// standard timeout margin on top of the commanded duration.
pub fn capture(camera: &mut dyn GuideCamera, duration: Duration) -> ExposureOutcome {
    let (notifier, gate) = ExposureGate::pair();
    if let Err(e) = camera.begin_exposure(duration, notifier) {
        return ExposureOutcome::Failed(e.to_string());
    }
    gate.wait(duration + CAPTURE_TIMEOUT_MARGIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::thread;

    #[test]
    fn test_gate_delivers_frame() {
        let (notifier, gate) = ExposureGate::pair();
        let handle = thread::spawn(move || {
            notifier.frame(GuideFrame::new(
                Array2::zeros((8, 8)),
                7,
                Duration::from_millis(1),
            ));
        });
        match gate.wait(Duration::from_secs(1)) {
            ExposureOutcome::Frame(frame) => assert_eq!(frame.number(), 7),
            other => panic!("expected frame, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_gate_times_out() {
        let (_notifier, gate) = ExposureGate::pair();
        assert!(matches!(
            gate.wait(Duration::from_millis(10)),
            ExposureOutcome::TimedOut
        ));
    }

    #[test]
    fn test_first_outcome_wins() {
        let (notifier, gate) = ExposureGate::pair();
        notifier.aborted();
        notifier.failed("late event");
        assert!(matches!(
            gate.wait(Duration::from_millis(10)),
            ExposureOutcome::Aborted
        ));
    }

    #[test]
    fn test_abort_flag_is_sticky() {
        let flag = AbortFlag::default();
        let other = flag.clone();
        assert!(!flag.is_set());
        other.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!other.is_set());
    }
}
