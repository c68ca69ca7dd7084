//! Capture worker.
//!
//! One dedicated thread owns the camera and the guider: it repeatedly
//! performs a blocking capture and feeds the frame into the guider on the
//! same step, so all guider state has a single writer. Administrative
//! commands arrive on a channel and are applied between frames.

use crate::camera::{capture, AbortFlag, ExposureOutcome, GuideCamera};
use crate::config::LockShiftRate;
use crate::guider::Guider;
use crate::point::Point;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Idle poll interval while not looping.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Administrative commands applied between frames.
#[derive(Debug, Clone)]
pub enum GuiderCommand {
    StartLooping,
    StopLooping,
    StartGuiding,
    StopGuiding,
    SelectStar { x: f64, y: f64 },
    DeselectStar,
    SetLockPosition(Point),
    EnableLockShift(bool),
    SetLockShiftRate(LockShiftRate),
    Dither { dx: f64, dy: f64 },
    Pause(bool),
    Reset { full: bool },
    Shutdown,
}

/// Handle to a running capture loop.
pub struct CaptureHandle {
    commands: Sender<GuiderCommand>,
    abort: AbortFlag,
    thread: JoinHandle<Guider>,
}

impl CaptureHandle {
    /// Queue a command for the worker. Returns false if the worker is gone.
    pub fn send(&self, command: GuiderCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Sticky abort: the in-flight exposure is cancelled and the dropped
    /// frame is treated as a normal detection failure.
    pub fn abort(&self) {
        self.abort.set();
    }

    /// Stop the worker and recover the guider.
    pub fn shutdown(self) -> Guider {
        let _ = self.commands.send(GuiderCommand::Shutdown);
        self.thread.join().expect("capture worker panicked")
    }
}

/// Spawn the capture worker thread.
pub fn spawn(camera: Box<dyn GuideCamera>, guider: Guider) -> CaptureHandle {
    let (commands, receiver) = unbounded();
    let abort = AbortFlag::default();
    let worker_abort = abort.clone();
    let thread = thread::Builder::new()
        .name("guide-capture".to_string())
        .spawn(move || run(camera, guider, receiver, worker_abort))
        .expect("failed to spawn guide-capture thread");
    CaptureHandle {
        commands,
        abort,
        thread,
    }
}

fn run(
    mut camera: Box<dyn GuideCamera>,
    mut guider: Guider,
    commands: Receiver<GuiderCommand>,
    abort: AbortFlag,
) -> Guider {
    let mut looping = false;
    let mut stop_requested = false;

    loop {
        // Drain pending commands before the next exposure.
        loop {
            match commands.try_recv() {
                Ok(GuiderCommand::Shutdown) => return guider,
                Ok(command) => apply(&mut guider, command, &mut looping, &mut stop_requested),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return guider,
            }
        }

        if !looping {
            // Idle: wait for the next command without burning the camera.
            match commands.recv_timeout(IDLE_POLL) {
                Ok(GuiderCommand::Shutdown) => return guider,
                Ok(command) => apply(&mut guider, command, &mut looping, &mut stop_requested),
                Err(_) => {}
            }
            continue;
        }

        if abort.is_set() {
            abort.clear();
            camera.abort_exposure();
            guider.handle_capture_failure();
            continue;
        }

        let exposure = camera.exposure();
        guider.set_camera_exposure(exposure, camera.auto_exposure());

        match capture(camera.as_mut(), exposure) {
            ExposureOutcome::Frame(frame) => {
                let stopping = std::mem::take(&mut stop_requested);
                guider.update_guide(&frame, stopping);
                if stopping {
                    looping = false;
                }
            }
            ExposureOutcome::Aborted => {
                log::info!("exposure aborted");
                guider.handle_capture_failure();
            }
            ExposureOutcome::Failed(message) => {
                log::warn!("exposure failed: {message}");
                guider.handle_capture_failure();
            }
            ExposureOutcome::TimedOut => {
                log::warn!("no terminal exposure event before the deadline");
                camera.abort_exposure();
                guider.handle_capture_failure();
            }
            ExposureOutcome::Detached => {
                log::error!("camera detached; stopping the capture loop");
                guider.handle_capture_failure();
                looping = false;
            }
        }
    }
}

fn apply(guider: &mut Guider, command: GuiderCommand, looping: &mut bool, stop_requested: &mut bool) {
    log::debug!("command: {command:?}");
    let result = match command {
        GuiderCommand::StartLooping => {
            let r = guider.start_looping();
            if r.is_ok() {
                *looping = true;
            }
            r
        }
        GuiderCommand::StopLooping => {
            guider.stop_looping();
            *looping = false;
            Ok(())
        }
        GuiderCommand::StartGuiding => guider.start_guiding(),
        GuiderCommand::StopGuiding => {
            // Delivered through the frame path so listener callbacks fire in
            // order with the final frame.
            *stop_requested = true;
            Ok(())
        }
        GuiderCommand::SelectStar { x, y } => guider.select_guide_star(x, y).map(|_| ()),
        GuiderCommand::DeselectStar => {
            guider.deselect_guide_star();
            Ok(())
        }
        GuiderCommand::SetLockPosition(position) => {
            if !guider.set_lock_position(position) {
                log::warn!("lock position rejected: ({:.1}, {:.1})", position.x(), position.y());
            }
            Ok(())
        }
        GuiderCommand::EnableLockShift(enabled) => {
            guider.enable_lock_position_shift(enabled);
            Ok(())
        }
        GuiderCommand::SetLockShiftRate(rate) => {
            guider.set_lock_shift_rate(rate);
            Ok(())
        }
        GuiderCommand::Dither { dx, dy } => guider.dither(dx, dy),
        GuiderCommand::Pause(paused) => {
            guider.set_paused(paused);
            Ok(())
        }
        GuiderCommand::Reset { full } => {
            guider.reset(full);
            Ok(())
        }
        GuiderCommand::Shutdown => Ok(()),
    };
    if let Err(error) = result {
        log::warn!("command rejected: {error}");
    }
}
