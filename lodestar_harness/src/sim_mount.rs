//! Simulated guide mount with a working calibration routine.
//!
//! The mount's true RA axis lies at a configurable angle in the camera
//! frame. Calibration pulses one axis at a time, measures the resulting star
//! motion, and returns the star to its start before switching axes. Guide
//! corrections are driven against the measured offset, closing the loop
//! through the shared sky state.

use crate::simulator_camera::SharedSky;
use lodestar::{
    Calibration, CalibrationStepInfo, CalibrationUpdate, GuideDirection, GuideMount, MoveMode,
    Parity, Point,
};
use std::sync::{Arc, Mutex};

/// Image shift per calibration pulse, px.
const CAL_PULSE: f64 = 1.0;

/// Star displacement that completes one calibration axis, px.
const CAL_DISTANCE: f64 = 8.0;

/// Pulses per axis before calibration gives up.
const CAL_MAX_STEPS: u32 = 30;

/// Record of notify_* callbacks, for tests and demos.
#[derive(Debug, Default)]
pub struct MountNotifications {
    pub guiding_started: u32,
    pub guiding_stopped: u32,
    pub paused: u32,
    pub resumed: u32,
    pub dithered: u32,
    pub settle_done: Vec<bool>,
    pub direct_moves: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalPhase {
    West,
    North,
}

#[derive(Debug)]
struct CalRoutine {
    phase: CalPhase,
    steps: u32,
    origin: Point,
    phase_start: Point,
    x_angle: Option<f64>,
}

pub struct SimulatedMount {
    sky: SharedSky,
    /// True camera-frame angle of star motion per positive RA pulse.
    angle: f64,
    calibration: Option<Calibration>,
    routine: Option<CalRoutine>,
    connected: bool,
    guiding_enabled: bool,
    ra_only: bool,
    declination: f64,
    notifications: Arc<Mutex<MountNotifications>>,
}

impl SimulatedMount {
    pub fn new(sky: SharedSky, angle: f64) -> Self {
        Self {
            sky,
            angle,
            calibration: None,
            routine: None,
            connected: true,
            guiding_enabled: true,
            ra_only: false,
            declination: 0.0,
            notifications: Arc::new(Mutex::new(MountNotifications::default())),
        }
    }

    pub fn notifications(&self) -> Arc<Mutex<MountNotifications>> {
        self.notifications.clone()
    }

    pub fn set_ra_only(&mut self, ra_only: bool) {
        self.ra_only = ra_only;
    }

    // Star-image shift produced by a (ra, dec) pulse.
    fn pulse(&self, ra: f64, dec: f64) {
        let (sin, cos) = self.angle.sin_cos();
        let dx = ra * cos - dec * sin;
        let dy = ra * sin + dec * cos;
        self.sky.add_mount_shift(dx, dy);
    }

    fn step_info(&self, routine: &CalRoutine, star: Point) -> CalibrationStepInfo {
        let direction = match routine.phase {
            CalPhase::West => GuideDirection::West,
            CalPhase::North => GuideDirection::North,
        };
        CalibrationStepInfo {
            direction,
            step: routine.steps,
            dx: star.x() - routine.origin.x(),
            dy: star.y() - routine.origin.y(),
            position: star,
            distance: star.distance(&routine.phase_start),
        }
    }
}

fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle;
    while a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    }
    while a < -std::f64::consts::PI {
        a += std::f64::consts::TAU;
    }
    a
}

impl GuideMount for SimulatedMount {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    fn guiding_enabled(&self) -> bool {
        self.guiding_enabled
    }

    fn guiding_ra_only(&self) -> bool {
        self.ra_only
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn ra_parity(&self) -> Parity {
        Parity::Even
    }

    fn dec_parity(&self) -> Parity {
        Parity::Even
    }

    fn declination(&self) -> f64 {
        self.declination
    }

    fn begin_calibration(&mut self, start: Point) -> bool {
        if !self.connected || !start.is_valid() {
            return false;
        }
        log::info!(
            "sim mount: calibration from ({:.1}, {:.1})",
            start.x(),
            start.y()
        );
        self.routine = Some(CalRoutine {
            phase: CalPhase::West,
            steps: 0,
            origin: start,
            phase_start: start,
            x_angle: None,
        });
        true
    }

    fn update_calibration_state(&mut self, star: Point) -> CalibrationUpdate {
        let Some(mut routine) = self.routine.take() else {
            return CalibrationUpdate::Failed("calibration was never started".to_string());
        };

        let distance = star.distance(&routine.phase_start);
        match routine.phase {
            CalPhase::West => {
                if distance >= CAL_DISTANCE {
                    let x_angle = star.angle(&routine.phase_start);
                    log::debug!("sim mount: RA axis measured at {:.2} rad", x_angle);
                    // Return the star to its start before the Dec axis.
                    self.pulse(-CAL_PULSE * routine.steps as f64, 0.0);
                    routine.x_angle = Some(x_angle);
                    routine.phase = CalPhase::North;
                    routine.steps = 0;
                    routine.phase_start = routine.origin;
                    let info = self.step_info(&routine, star);
                    self.routine = Some(routine);
                    return CalibrationUpdate::Step(info);
                }
                if routine.steps >= CAL_MAX_STEPS {
                    return CalibrationUpdate::Failed(
                        "star did not move during RA calibration".to_string(),
                    );
                }
                routine.steps += 1;
                self.pulse(CAL_PULSE, 0.0);
                let info = self.step_info(&routine, star);
                self.routine = Some(routine);
                CalibrationUpdate::Step(info)
            }
            CalPhase::North => {
                if distance >= CAL_DISTANCE {
                    let x_angle = routine.x_angle.expect("West phase measured first");
                    let north_angle = star.angle(&routine.phase_start);
                    let y_angle_error =
                        normalize_angle(north_angle - (x_angle + std::f64::consts::FRAC_PI_2));
                    // Return to start; calibration is done.
                    self.pulse(0.0, -CAL_PULSE * routine.steps as f64);
                    let calibration =
                        Calibration::new(x_angle, y_angle_error, Parity::Even, Parity::Even);
                    self.calibration = Some(calibration);
                    log::info!(
                        "sim mount: calibrated, RA {:.1} deg, Dec skew {:.2} deg",
                        x_angle.to_degrees(),
                        y_angle_error.to_degrees()
                    );
                    return CalibrationUpdate::Complete(calibration);
                }
                if routine.steps >= CAL_MAX_STEPS {
                    return CalibrationUpdate::Failed(
                        "star did not move during Dec calibration".to_string(),
                    );
                }
                routine.steps += 1;
                self.pulse(0.0, CAL_PULSE);
                let info = self.step_info(&routine, star);
                self.routine = Some(routine);
                CalibrationUpdate::Step(info)
            }
        }
    }

    fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    fn camera_to_mount(&self, camera: Point) -> Point {
        match self.calibration {
            Some(calibration) => calibration.camera_to_mount(camera),
            None => camera,
        }
    }

    fn move_offset(&mut self, correction: Point, mode: MoveMode) -> bool {
        if !self.connected {
            return false;
        }
        // Drive against the measured offset.
        self.pulse(-correction.x(), -correction.y());
        log::trace!(
            "sim mount: {:?} move ({:.3}, {:.3})",
            mode,
            correction.x(),
            correction.y()
        );
        true
    }

    fn notify_guiding_started(&mut self) {
        self.notifications.lock().unwrap().guiding_started += 1;
    }

    fn notify_guiding_stopped(&mut self) {
        self.notifications.lock().unwrap().guiding_stopped += 1;
    }

    fn notify_guiding_paused(&mut self) {
        self.notifications.lock().unwrap().paused += 1;
    }

    fn notify_guiding_resumed(&mut self) {
        self.notifications.lock().unwrap().resumed += 1;
    }

    fn notify_guiding_dithered(&mut self, _dx: f64, _dy: f64, _mount_coords: bool) {
        self.notifications.lock().unwrap().dithered += 1;
    }

    fn notify_dither_settle_done(&mut self, success: bool) {
        self.notifications.lock().unwrap().settle_done.push(success);
    }

    fn notify_direct_move(&mut self, _distance: f64) {
        self.notifications.lock().unwrap().direct_moves += 1;
    }
}
